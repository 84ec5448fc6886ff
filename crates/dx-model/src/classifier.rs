use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dx_core::config::Architecture;
use dx_core::error::XaiError;
use dx_core::frame::{CHANNELS, ClassPrediction, ClassVocabulary, IMAGE_SIZE, SpectralImage};
use dx_core::runtime::run_with_timeout;
use dx_core::traits::ImageModel;
use rayon::prelude::*;

use crate::artifact::load_network;
use crate::network::Network;
use crate::preprocess::Preprocessing;

/// Adaptateur du classifieur de production : image spectrale → prédiction.
///
/// Loaded once, then shared read-only (clones share the same model).
///
/// # Example
/// ```
/// use dx_core::config::Architecture;
/// use dx_core::frame::{ClassVocabulary, SpectralImage};
/// use dx_model::Classifier;
///
/// let clf = Classifier::from_architecture(Architecture::MobileNet, ClassVocabulary::default(), 0).unwrap();
/// let p = clf.predict(&SpectralImage::new(224, 224)).unwrap();
/// assert!(p.label < 2);
/// assert!((p.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
/// ```
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ImageModel>,
    vocabulary: ClassVocabulary,
    preprocessing: Preprocessing,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("model", &self.model.name())
            .field("vocabulary", &self.vocabulary)
            .field("preprocessing", &self.preprocessing)
            .finish()
    }
}

impl Classifier {
    /// Wrap a model whose output matches `vocabulary`.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if the model does not take
    /// 224×224×3 input or its class count differs from the vocabulary.
    pub fn new(model: Arc<dyn ImageModel>, vocabulary: ClassVocabulary) -> Result<Self, XaiError> {
        let size = IMAGE_SIZE as usize;
        if model.input_shape() != (size, size, CHANNELS) {
            return Err(XaiError::ModelUnavailable(format!(
                "model '{}' takes {:?}, expected ({size}, {size}, {CHANNELS})",
                model.name(),
                model.input_shape()
            )));
        }
        if model.num_classes() != vocabulary.len() {
            return Err(XaiError::ModelUnavailable(format!(
                "model '{}' outputs {} classes, vocabulary has {}",
                model.name(),
                model.num_classes(),
                vocabulary.len()
            )));
        }
        Ok(Self {
            model,
            vocabulary,
            preprocessing: Preprocessing::UnitScale,
        })
    }

    /// Untrained preset network, for wiring and tests.
    ///
    /// # Errors
    /// See [`Classifier::new`].
    pub fn from_architecture(
        architecture: Architecture,
        vocabulary: ClassVocabulary,
        seed: u64,
    ) -> Result<Self, XaiError> {
        let net = Network::from_architecture(architecture, vocabulary.len(), seed)?;
        Self::new(Arc::new(net), vocabulary)
    }

    /// Load a weight artifact.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if the artifact cannot be read or
    /// its class names differ from `vocabulary`.
    pub fn load(path: &Path, vocabulary: ClassVocabulary) -> Result<Self, XaiError> {
        let start = Instant::now();
        let (net, classes) = load_network(path)?;
        if classes != vocabulary.names() {
            return Err(XaiError::ModelUnavailable(format!(
                "artifact classes {classes:?} differ from configured {:?}",
                vocabulary.names()
            )));
        }
        let clf = Self::new(Arc::new(net), vocabulary)?;
        log::info!(
            "Loaded classifier '{}' from {} in {:.1} ms",
            clf.model.name(),
            path.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(clf)
    }

    /// [`Classifier::load`] bounded by `limit`.
    ///
    /// # Errors
    /// `XaiError::Timeout` on expiry, otherwise see [`Classifier::load`].
    pub fn load_with_timeout(
        path: PathBuf,
        vocabulary: ClassVocabulary,
        limit: Duration,
    ) -> Result<Self, XaiError> {
        run_with_timeout("model load", limit, move || Self::load(&path, vocabulary))
    }

    /// Shared model handle.
    #[must_use]
    pub fn model(&self) -> &Arc<dyn ImageModel> {
        &self.model
    }

    /// Output vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> &ClassVocabulary {
        &self.vocabulary
    }

    /// Probability vector for one image, renormalised to sum to 1.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if inference fails or yields a
    /// vector of the wrong length, with negative or non-finite values.
    pub fn probabilities(&self, image: &SpectralImage) -> Result<Vec<f32>, XaiError> {
        Ok(self.checked(image)?.probabilities)
    }

    fn checked(&self, image: &SpectralImage) -> Result<ClassPrediction, XaiError> {
        let input = self.preprocessing.apply(image);
        ClassPrediction::from_probabilities(self.model.forward(&input)?, &self.vocabulary)
    }

    /// Classify one spectral image.
    ///
    /// # Errors
    /// See [`Classifier::probabilities`].
    pub fn predict(&self, image: &SpectralImage) -> Result<ClassPrediction, XaiError> {
        let start = Instant::now();
        let prediction = self.checked(image)?;
        log::debug!(
            "Predicted '{}' ({:.3}) in {:.1} ms",
            prediction.label_name,
            prediction.confidence(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(prediction)
    }

    /// Classify several images in parallel. Results keep the input order.
    ///
    /// # Errors
    /// First failing image's error.
    pub fn predict_batch(&self, images: &[SpectralImage]) -> Result<Vec<ClassPrediction>, XaiError> {
        images.par_iter().map(|img| self.predict(img)).collect()
    }
}
