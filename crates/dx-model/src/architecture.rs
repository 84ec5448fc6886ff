use dx_core::config::Architecture;
use dx_core::error::XaiError;
use dx_core::frame::{CHANNELS, IMAGE_SIZE};

use crate::layers::{Conv2d, Dense, Layer};
use crate::network::Network;

/// Initialisation déterministe des poids (He normal, Box-Muller sur fastrand).
struct Init {
    rng: fastrand::Rng,
}

impl Init {
    fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn normal(&mut self) -> f32 {
        // (0, 1] keeps ln() finite
        let u1 = 1.0 - self.rng.f64();
        let u2 = self.rng.f64();
        ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
    }

    fn he(&mut self, count: usize, fan_in: usize) -> Vec<f32> {
        let std = (2.0 / fan_in.max(1) as f32).sqrt();
        (0..count).map(|_| self.normal() * std).collect()
    }

    fn conv(
        &mut self,
        name: &str,
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
    ) -> Layer {
        let fan_in = kernel * kernel * in_ch;
        Layer::Conv2d(Conv2d {
            name: name.to_string(),
            in_ch,
            out_ch,
            kernel,
            stride,
            relu: true,
            weights: self.he(out_ch * fan_in, fan_in),
            bias: vec![0.0; out_ch],
        })
    }

    fn dense(&mut self, name: &str, inputs: usize, outputs: usize) -> Layer {
        Layer::Dense(Dense {
            name: name.to_string(),
            inputs,
            outputs,
            weights: self.he(inputs * outputs, inputs),
            bias: vec![0.0; outputs],
        })
    }
}

fn pool(name: &str) -> Layer {
    Layer::MaxPool {
        name: name.to_string(),
        size: 2,
    }
}

fn head(init: &mut Init, layers: &mut Vec<Layer>, features: usize, classes: usize) {
    layers.push(Layer::GlobalAvgPool {
        name: "global_average_pooling".into(),
    });
    layers.push(init.dense("predictions", features, classes));
    layers.push(Layer::Softmax {
        name: "softmax".into(),
    });
}

/// Strided stack, one 3×3 stride-2 convolution per stage.
fn mobilenet(init: &mut Init, classes: usize) -> Vec<Layer> {
    let widths = [8, 16, 32, 64, 64];
    let mut layers = Vec::new();
    let mut in_ch = CHANNELS;
    for (i, &w) in widths.iter().enumerate() {
        layers.push(init.conv(&format!("conv{}", i + 1), in_ch, w, 3, 2));
        in_ch = w;
    }
    head(init, &mut layers, in_ch, classes);
    layers
}

/// 5×5 stem, then alternating 1×1 bottlenecks and strided 3×3 mixes.
fn inception(init: &mut Init, classes: usize) -> Vec<Layer> {
    let mut layers = vec![init.conv("stem", CHANNELS, 8, 5, 2), pool("stem_pool")];
    let stages = [(16, 1, 1), (32, 3, 2), (32, 1, 1), (64, 3, 2), (64, 3, 2)];
    let mut in_ch = 8;
    for (i, &(w, k, s)) in stages.iter().enumerate() {
        layers.push(init.conv(&format!("mixed{i}"), in_ch, w, k, s));
        in_ch = w;
    }
    head(init, &mut layers, in_ch, classes);
    layers
}

/// Blocs 3×3 empilés, nommés comme VGG16 (`block5_conv3` = dernière conv).
fn vgg(init: &mut Init, classes: usize) -> Vec<Layer> {
    let blocks: [(usize, usize); 5] = [(8, 2), (16, 2), (32, 3), (64, 3), (64, 3)];
    let mut layers = Vec::new();
    let mut in_ch = CHANNELS;
    for (b, &(w, convs)) in blocks.iter().enumerate() {
        for c in 0..convs {
            layers.push(init.conv(&format!("block{}_conv{}", b + 1, c + 1), in_ch, w, 3, 1));
            in_ch = w;
        }
        layers.push(pool(&format!("block{}_pool", b + 1)));
    }
    head(init, &mut layers, in_ch, classes);
    layers
}

fn custom(init: &mut Init, classes: usize) -> Vec<Layer> {
    let mut layers = Vec::new();
    let mut in_ch = CHANNELS;
    for (i, &w) in [8, 16, 32].iter().enumerate() {
        layers.push(init.conv(&format!("conv_{}", i + 1), in_ch, w, 3, 1));
        layers.push(pool(&format!("pool_{}", i + 1)));
        in_ch = w;
    }
    // 28×28 → 7×7 before the head
    layers.push(init.conv("conv_4", in_ch, 64, 3, 2));
    layers.push(pool("pool_4"));
    head(init, &mut layers, 64, classes);
    layers
}

impl Network {
    /// Réseau préréglé, poids initialisés depuis `seed`.
    ///
    /// Same `(architecture, num_classes, seed)` → same weights, bit for bit.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if `num_classes` is 0.
    ///
    /// # Example
    /// ```
    /// use dx_core::config::Architecture;
    /// use dx_core::traits::{ImageModel, IntrospectableModel};
    /// use dx_model::Network;
    ///
    /// let net = Network::from_architecture(Architecture::Vgg, 1000, 16).unwrap();
    /// assert_eq!(net.num_classes(), 1000);
    /// assert!(net.has_layer("block5_conv3"));
    /// ```
    pub fn from_architecture(
        architecture: Architecture,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self, XaiError> {
        if num_classes == 0 {
            return Err(XaiError::ModelUnavailable(
                "a classifier needs at least one class".into(),
            ));
        }
        let mut init = Init::new(seed);
        let (name, layers) = match architecture {
            Architecture::MobileNet => ("mobilenet", mobilenet(&mut init, num_classes)),
            Architecture::Inception => ("inception", inception(&mut init, num_classes)),
            Architecture::Vgg => ("vgg", vgg(&mut init, num_classes)),
            Architecture::Custom => ("cnn", custom(&mut init, num_classes)),
        };
        let size = IMAGE_SIZE as usize;
        let net = Self::new(name, (size, size, CHANNELS), layers)?;
        log::debug!(
            "Built {name} preset: {} layers, {} parameters, {num_classes} classes (seed {seed})",
            net.layers().len(),
            net.parameter_count()
        );
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::traits::{ImageModel, IntrospectableModel};

    #[test]
    fn every_preset_is_valid() {
        for arch in [
            Architecture::MobileNet,
            Architecture::Inception,
            Architecture::Vgg,
            Architecture::Custom,
        ] {
            let net = Network::from_architecture(arch, 2, 1).unwrap();
            assert_eq!(net.input_shape(), (224, 224, 3));
            assert_eq!(net.num_classes(), 2);
        }
    }

    #[test]
    fn same_seed_same_weights() {
        let a = Network::from_architecture(Architecture::MobileNet, 2, 42).unwrap();
        let b = Network::from_architecture(Architecture::MobileNet, 2, 42).unwrap();
        let c = Network::from_architecture(Architecture::MobileNet, 2, 43).unwrap();
        let weights = |n: &Network| match &n.layers()[0] {
            Layer::Conv2d(c) => c.weights.clone(),
            _ => Vec::new(),
        };
        assert_eq!(weights(&a), weights(&b));
        assert_ne!(weights(&a), weights(&c));
    }

    #[test]
    fn vgg_exposes_keras_layer_names() {
        let net = Network::from_architecture(Architecture::Vgg, 10, 0).unwrap();
        let names = net.layer_names();
        assert!(names.contains(&"block1_conv1".to_string()));
        assert!(names.contains(&"block5_conv3".to_string()));
        assert!(names.contains(&"block5_pool".to_string()));
    }

    #[test]
    fn zero_classes_is_rejected() {
        assert!(Network::from_architecture(Architecture::Custom, 0, 0).is_err());
    }

    #[test]
    fn he_init_has_expected_spread() {
        let mut init = Init::new(3);
        let w = init.he(20_000, 50);
        let mean = w.iter().sum::<f32>() / w.len() as f32;
        let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / w.len() as f32;
        assert!(mean.abs() < 0.02);
        assert!((var - 2.0 / 50.0).abs() < 0.005, "variance {var}");
    }
}
