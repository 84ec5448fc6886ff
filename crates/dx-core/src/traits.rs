use ndarray::Array3;

use crate::config::ScoreKind;
use crate::error::XaiError;

/// Modèle de classification d'images : tenseur (H, W, C) → vecteur de probabilités.
///
/// Implémenté par : `Network` (presets MobileNet-like, Inception-like,
/// VGG-like, CNN custom). Chargé une fois, partagé en lecture seule.
///
/// # Example
/// ```
/// use dx_core::traits::ImageModel;
/// use dx_core::error::XaiError;
/// use ndarray::Array3;
///
/// struct Uniform;
/// impl ImageModel for Uniform {
///     fn name(&self) -> &str { "uniform" }
///     fn input_shape(&self) -> (usize, usize, usize) { (224, 224, 3) }
///     fn num_classes(&self) -> usize { 2 }
///     fn forward(&self, _input: &Array3<f32>) -> Result<Vec<f32>, XaiError> {
///         Ok(vec![0.5, 0.5])
///     }
/// }
/// assert!(Uniform.introspect().is_none());
/// ```
pub trait ImageModel: Send + Sync {
    /// Human readable backend name.
    fn name(&self) -> &str;

    /// Expected input shape (height, width, channels).
    fn input_shape(&self) -> (usize, usize, usize);

    /// Length of the output vector.
    fn num_classes(&self) -> usize;

    /// Single-image inference. Returns one probability per class.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if the input shape is wrong or the
    /// backend fails.
    fn forward(&self, input: &Array3<f32>) -> Result<Vec<f32>, XaiError>;

    /// Layer-level access, for backends that offer it.
    fn introspect(&self) -> Option<&dyn IntrospectableModel> {
        None
    }
}

/// Activation of one layer with the gradient of a class score flowing into it.
#[derive(Clone, Debug)]
pub struct LayerProbe {
    /// Activation tensor (H, W, C) of the probed layer.
    pub activation: Array3<f32>,
    /// d(score)/d(activation), same shape as `activation`.
    pub gradient: Array3<f32>,
    /// Final class probabilities of the forward pass.
    pub probabilities: Vec<f32>,
}

/// Accès aux couches internes et à la différentiation automatique.
pub trait IntrospectableModel {
    /// Names of every layer, in forward order.
    fn layer_names(&self) -> Vec<String>;

    /// True when `name` is one of [`IntrospectableModel::layer_names`].
    fn has_layer(&self, name: &str) -> bool {
        self.layer_names().iter().any(|n| n == name)
    }

    /// Forward pass capturing `layer`'s activation, then backward pass of the
    /// `target_class` score down to that activation.
    ///
    /// # Errors
    /// `LayerNotFound` for an unknown layer, `TargetClassOutOfRange` for a bad
    /// class index, `GradientUnavailable` if the path cannot be differentiated.
    fn probe(
        &self,
        input: &Array3<f32>,
        layer: &str,
        target_class: usize,
        score: ScoreKind,
    ) -> Result<LayerProbe, XaiError>;
}
