use dx_core::config::ScoreKind;
use dx_core::error::XaiError;
use dx_core::traits::{ImageModel, IntrospectableModel, LayerProbe};
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::layers::{Layer, Shape, Tensor, softmax};

/// Réseau convolutif séquentiel : entrée (H, W, C) → probabilités de classes.
///
/// Every intermediate activation is kept during [`IntrospectableModel::probe`]
/// so that the backward pass can stop at any named spatial layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    name: String,
    input: (usize, usize, usize),
    layers: Vec<Layer>,
    classes: usize,
}

impl Network {
    /// Assemble and validate a network.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if layer names repeat, a layer
    /// cannot take its predecessor's output, or the network does not end with
    /// a class vector.
    pub fn new(
        name: impl Into<String>,
        input: (usize, usize, usize),
        layers: Vec<Layer>,
    ) -> Result<Self, XaiError> {
        let mut net = Self {
            name: name.into(),
            input,
            layers,
            classes: 0,
        };
        net.classes = net.validate()?;
        Ok(net)
    }

    /// Check the layer chain. Returns the number of classes.
    ///
    /// # Errors
    /// See [`Network::new`].
    pub fn validate(&self) -> Result<usize, XaiError> {
        if self.layers.is_empty() {
            return Err(XaiError::ModelUnavailable(format!(
                "network '{}' has no layers",
                self.name
            )));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if self.layers[..i].iter().any(|l| l.name() == layer.name()) {
                return Err(XaiError::ModelUnavailable(format!(
                    "duplicate layer name '{}'",
                    layer.name()
                )));
            }
        }
        let (h, w, c) = self.input;
        let mut shape = Shape::Spatial(h, w, c);
        for layer in &self.layers {
            shape = layer.output_shape(shape)?;
        }
        match shape {
            Shape::Flat(n) if n > 0 => Ok(n),
            other => Err(XaiError::ModelUnavailable(format!(
                "network '{}' ends with {other:?}, expected a class vector",
                self.name
            ))),
        }
    }

    /// Layers in forward order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Total number of weights and biases.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    /// Number of layers producing logits (a trailing softmax is excluded).
    fn logit_depth(&self) -> usize {
        match self.layers.last() {
            Some(Layer::Softmax { .. }) => self.layers.len() - 1,
            _ => self.layers.len(),
        }
    }

    fn check_input(&self, input: &Array3<f32>) -> Result<(), XaiError> {
        if input.dim() != self.input {
            return Err(XaiError::ModelUnavailable(format!(
                "network '{}' expects input {:?}, got {:?}",
                self.name,
                self.input,
                input.dim()
            )));
        }
        if input.iter().any(|v| !v.is_finite()) {
            return Err(XaiError::ModelUnavailable(
                "input tensor holds non-finite values".into(),
            ));
        }
        Ok(())
    }

    /// Forward pass up to the logits. `acts[0]` is the input, `acts[i + 1]`
    /// the output of layer `i`.
    fn forward_logits(&self, input: &Array3<f32>) -> Result<Vec<Tensor>, XaiError> {
        self.check_input(input)?;
        let depth = self.logit_depth();
        let mut acts = Vec::with_capacity(depth + 1);
        acts.push(Tensor::Spatial(input.clone()));
        for layer in &self.layers[..depth] {
            let next = match acts.last() {
                Some(x) => layer.forward(x)?,
                None => break,
            };
            acts.push(next);
        }
        Ok(acts)
    }

    fn logits_of(acts: &[Tensor]) -> Result<&Array1<f32>, XaiError> {
        match acts.last() {
            Some(Tensor::Flat(z)) => Ok(z),
            _ => Err(XaiError::ModelUnavailable(
                "network did not produce a class vector".into(),
            )),
        }
    }
}

impl ImageModel for Network {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.classes
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Vec<f32>, XaiError> {
        let acts = self.forward_logits(input)?;
        let probs = softmax(Self::logits_of(&acts)?);
        Ok(probs.to_vec())
    }

    fn introspect(&self) -> Option<&dyn IntrospectableModel> {
        Some(self)
    }
}

impl IntrospectableModel for Network {
    fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name().to_string()).collect()
    }

    fn probe(
        &self,
        input: &Array3<f32>,
        layer: &str,
        target_class: usize,
        score: ScoreKind,
    ) -> Result<LayerProbe, XaiError> {
        let index = self
            .layers
            .iter()
            .position(|l| l.name() == layer)
            .ok_or_else(|| XaiError::LayerNotFound {
                name: layer.to_string(),
            })?;
        if target_class >= self.classes {
            return Err(XaiError::TargetClassOutOfRange {
                index: target_class,
                classes: self.classes,
            });
        }
        let depth = self.logit_depth();
        if index >= depth {
            return Err(XaiError::GradientUnavailable(format!(
                "layer '{layer}' lies after the logits"
            )));
        }

        let acts = self.forward_logits(input)?;
        let Tensor::Spatial(activation) = &acts[index + 1] else {
            return Err(XaiError::GradientUnavailable(format!(
                "layer '{layer}' has no spatial output"
            )));
        };
        let probs = softmax(Self::logits_of(&acts)?);

        // d(score)/d(logits)
        let seed: Array1<f32> = match score {
            ScoreKind::Logit => {
                Array1::from_shape_fn(probs.len(), |i| if i == target_class { 1.0 } else { 0.0 })
            }
            ScoreKind::Probability => {
                let pt = probs[target_class];
                Array1::from_shape_fn(probs.len(), |i| {
                    let delta = if i == target_class { 1.0 } else { 0.0 };
                    pt * (delta - probs[i])
                })
            }
        };

        let mut grad = Tensor::Flat(seed);
        for i in (index + 1..depth).rev() {
            grad = self.layers[i].backward(&acts[i], &acts[i + 1], &grad)?;
        }

        let Tensor::Spatial(gradient) = grad else {
            return Err(XaiError::GradientUnavailable(format!(
                "gradient reaching '{layer}' is not spatial"
            )));
        };
        if gradient.dim() != activation.dim() || gradient.iter().any(|v| !v.is_finite()) {
            return Err(XaiError::GradientUnavailable(format!(
                "gradient at '{layer}' is malformed or non-finite"
            )));
        }

        Ok(LayerProbe {
            activation: activation.clone(),
            gradient,
            probabilities: probs.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Conv2d, Dense};
    use dx_core::error::ErrorKind;

    fn tiny(seed: u64) -> Network {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut w = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.f32() - 0.5).collect() };
        Network::new(
            "tiny",
            (8, 8, 3),
            vec![
                Layer::Conv2d(Conv2d {
                    name: "conv".into(),
                    in_ch: 3,
                    out_ch: 4,
                    kernel: 3,
                    stride: 1,
                    relu: true,
                    weights: w(4 * 9 * 3),
                    bias: vec![0.05; 4],
                }),
                Layer::MaxPool {
                    name: "pool".into(),
                    size: 2,
                },
                Layer::GlobalAvgPool { name: "gap".into() },
                Layer::Dense(Dense {
                    name: "fc".into(),
                    inputs: 4,
                    outputs: 3,
                    weights: w(12),
                    bias: vec![0.0; 3],
                }),
                Layer::Softmax {
                    name: "softmax".into(),
                },
            ],
        )
        .unwrap()
    }

    fn image(seed: u64) -> Array3<f32> {
        let mut rng = fastrand::Rng::with_seed(seed);
        Array3::from_shape_fn((8, 8, 3), |_| rng.f32())
    }

    #[test]
    fn forward_is_a_distribution() {
        let net = tiny(1);
        let p = net.forward(&image(2)).unwrap();
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn rejects_wrong_input_shape() {
        let net = tiny(1);
        let err = net.forward(&Array3::zeros((4, 4, 3))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn rejects_duplicate_layer_names() {
        let layers = vec![
            Layer::GlobalAvgPool { name: "x".into() },
            Layer::Softmax { name: "x".into() },
        ];
        assert!(Network::new("dup", (2, 2, 3), layers).is_err());
    }

    #[test]
    fn probe_errors() {
        let net = tiny(1);
        let x = image(3);
        let err = net.probe(&x, "block9", 0, ScoreKind::Probability).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayerNotFound);
        let err = net.probe(&x, "conv", 3, ScoreKind::Probability).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TargetClassOutOfRange);
        let err = net.probe(&x, "gap", 0, ScoreKind::Probability).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GradientUnavailable);
    }

    /// Nudging the probed activation along its gradient raises the class score.
    #[test]
    fn probe_gradient_matches_finite_differences() {
        let net = tiny(7);
        let x = image(5);
        for score in [ScoreKind::Logit, ScoreKind::Probability] {
            let probe = net.probe(&x, "pool", 1, score).unwrap();
            assert_eq!(probe.activation.dim(), (4, 4, 4));
            assert_eq!(probe.gradient.dim(), probe.activation.dim());

            // score as a function of the pool output: gap → fc → (softmax)
            let head = |a: &Array3<f32>| -> f32 {
                let mut t = Tensor::Spatial(a.clone());
                for layer in &net.layers()[2..4] {
                    t = layer.forward(&t).unwrap();
                }
                let Tensor::Flat(z) = t else { unreachable!() };
                match score {
                    ScoreKind::Logit => z[1],
                    ScoreKind::Probability => softmax(&z)[1],
                }
            };
            let eps = 1e-2;
            let idx = (1, 2, 3);
            let mut up = probe.activation.clone();
            up[idx] += eps;
            let mut down = probe.activation.clone();
            down[idx] -= eps;
            let numeric = (head(&up) - head(&down)) / (2.0 * eps);
            assert!(
                (numeric - probe.gradient[idx]).abs() < 1e-3,
                "{score:?}: numeric {numeric} analytic {}",
                probe.gradient[idx]
            );
        }
    }

    #[test]
    fn probe_reports_forward_probabilities() {
        let net = tiny(4);
        let x = image(6);
        let probe = net.probe(&x, "conv", 0, ScoreKind::Probability).unwrap();
        let p = net.forward(&x).unwrap();
        for (a, b) in probe.probabilities.iter().zip(&p) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
