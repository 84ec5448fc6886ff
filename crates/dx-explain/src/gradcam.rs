use std::sync::Arc;
use std::time::Instant;

use dx_core::config::{GradientConfig, ScoreKind};
use dx_core::error::XaiError;
use dx_core::frame::{SaliencyMap, SpectralImage};
use dx_core::traits::{ImageModel, IntrospectableModel};
use dx_model::Network;
use dx_model::Preprocessing;
use dx_model::artifact::load_network;
use dx_render::resize::upsample_bilinear;

/// Carte d'activation de classe (Grad-CAM) sur un réseau de référence.
///
/// The reference network is independent of the production classifier and
/// takes caffe-style input (BGR, ImageNet means subtracted).
#[derive(Clone)]
pub struct GradientExplainer {
    model: Arc<dyn ImageModel>,
    layer: String,
    score: ScoreKind,
    preprocessing: Preprocessing,
}

impl std::fmt::Debug for GradientExplainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradientExplainer")
            .field("model", &self.model.name())
            .field("layer", &self.layer)
            .field("score", &self.score)
            .finish_non_exhaustive()
    }
}

fn introspect(model: &dyn ImageModel) -> Result<&dyn IntrospectableModel, XaiError> {
    model.introspect().ok_or_else(|| {
        XaiError::GradientUnavailable(format!(
            "model '{}' does not expose its layers",
            model.name()
        ))
    })
}

impl GradientExplainer {
    /// Explainer over `model`, attributing through `layer`.
    ///
    /// # Errors
    /// `GradientUnavailable` if the model is not introspectable,
    /// `LayerNotFound` if it has no layer named `layer`.
    pub fn new(
        model: Arc<dyn ImageModel>,
        layer: impl Into<String>,
        score: ScoreKind,
    ) -> Result<Self, XaiError> {
        let layer = layer.into();
        if !introspect(model.as_ref())?.has_layer(&layer) {
            return Err(XaiError::LayerNotFound { name: layer });
        }
        Ok(Self {
            model,
            layer,
            score,
            preprocessing: Preprocessing::Caffe,
        })
    }

    /// Build the reference network described by `config`: the weight artifact
    /// when one is given, the seeded preset otherwise.
    ///
    /// # Errors
    /// `ModelUnavailable` if the artifact cannot be loaded, then see
    /// [`GradientExplainer::new`].
    pub fn from_config(config: &GradientConfig) -> Result<Self, XaiError> {
        let net = match &config.weights_path {
            Some(path) => load_network(path)?.0,
            None => Network::from_architecture(config.architecture, config.num_classes, config.seed)?,
        };
        log::debug!(
            "Reference network '{}' ({} classes), layer {}",
            net.name(),
            net.num_classes(),
            config.layer
        );
        Self::new(Arc::new(net), config.layer.clone(), config.score)
    }

    /// Designated layer.
    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Reference network.
    #[must_use]
    pub fn model(&self) -> &Arc<dyn ImageModel> {
        &self.model
    }

    /// Output classes of the reference network.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Saliency map of `target_class` at the resolution of `image`.
    ///
    /// # Errors
    /// `TargetClassOutOfRange` if `target_class` ≥ [`Self::num_classes`],
    /// `LayerNotFound` / `GradientUnavailable` from the backward pass.
    pub fn explain(
        &self,
        image: &SpectralImage,
        target_class: usize,
    ) -> Result<SaliencyMap, XaiError> {
        let start = Instant::now();
        if target_class >= self.model.num_classes() {
            return Err(XaiError::TargetClassOutOfRange {
                index: target_class,
                classes: self.model.num_classes(),
            });
        }
        let input = self.preprocessing.apply(image);
        let probe = introspect(self.model.as_ref())?.probe(
            &input,
            &self.layer,
            target_class,
            self.score,
        )?;

        let (h, w, c) = probe.activation.dim();
        let area = (h * w).max(1) as f32;
        let weights: Vec<f32> = (0..c)
            .map(|k| probe.gradient.index_axis(ndarray::Axis(2), k).sum() / area)
            .collect();

        let mut cam = vec![0.0f32; h * w];
        for y in 0..h {
            for x in 0..w {
                let v: f32 = (0..c).map(|k| weights[k] * probe.activation[[y, x, k]]).sum();
                cam[y * w + x] = v.max(0.0);
            }
        }
        let peak = cam.iter().copied().fold(0.0f32, f32::max);
        if peak > 0.0 && peak.is_finite() {
            for v in &mut cam {
                *v /= peak;
            }
        } else {
            log::debug!("Grad-CAM for class {target_class} is empty at {}", self.layer);
            cam.fill(0.0);
        }

        let (out_w, out_h) = (image.width(), image.height());
        let mut values = upsample_bilinear(&cam, h, w, out_h as usize, out_w as usize);
        for v in &mut values {
            *v = v.clamp(0.0, 1.0);
        }

        log::info!(
            "Grad-CAM: class {target_class} (p = {:.3}) at {} ({h}×{w}) in {:.1} ms",
            probe.probabilities.get(target_class).copied().unwrap_or(0.0),
            self.layer,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(SaliencyMap {
            values,
            width: out_w,
            height: out_h,
            target_class,
            activation_size: (h, w),
        })
    }
}
