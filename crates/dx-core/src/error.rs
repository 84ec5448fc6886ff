use std::time::Duration;

use thiserror::Error;

/// Errors raised anywhere in the extraction → classification → explanation chain.
///
/// Every component fails fast with one of these; the orchestrator surfaces the
/// first failure unchanged.
#[derive(Error, Debug, Clone)]
pub enum XaiError {
    /// Bad, empty or silent audio, or invalid transform parameters.
    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// Classifier artifact cannot be loaded or does not match the class vocabulary.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Superpixel segmentation produced no usable regions.
    #[error("Segmentation failed: {0}")]
    Segmentation(String),

    /// Not enough perturbation samples for an unregularised surrogate fit.
    #[error("Insufficient samples: {samples} samples for {regions} regions")]
    InsufficientSamples {
        /// Number of perturbation samples requested.
        samples: usize,
        /// Number of superpixel regions.
        regions: usize,
    },

    /// Designated layer does not exist in the reference network.
    #[error("Layer not found: {name}")]
    LayerNotFound {
        /// Requested layer name.
        name: String,
    },

    /// Gradients of the class score cannot be computed.
    #[error("Gradient unavailable: {0}")]
    GradientUnavailable(String),

    /// Target class index outside the model's output vocabulary.
    #[error("Target class {index} out of range (model has {classes} classes)")]
    TargetClassOutOfRange {
        /// Requested class index.
        index: usize,
        /// Number of classes the model outputs.
        classes: usize,
    },

    /// A bounded unit of work did not finish in time.
    #[error("Timeout: {stage} exceeded {limit:?}")]
    Timeout {
        /// Stage that timed out.
        stage: &'static str,
        /// Configured limit.
        limit: Duration,
    },

    /// Caller cancelled the request before the next unit of work started.
    #[error("Cancelled before {stage}")]
    Cancelled {
        /// Stage that was not started.
        stage: &'static str,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error while reading or writing an artifact.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Discriminant of [`XaiError`], comparable without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// See [`XaiError::FeatureExtraction`].
    FeatureExtraction,
    /// See [`XaiError::ModelUnavailable`].
    ModelUnavailable,
    /// See [`XaiError::Segmentation`].
    Segmentation,
    /// See [`XaiError::InsufficientSamples`].
    InsufficientSamples,
    /// See [`XaiError::LayerNotFound`].
    LayerNotFound,
    /// See [`XaiError::GradientUnavailable`].
    GradientUnavailable,
    /// See [`XaiError::TargetClassOutOfRange`].
    TargetClassOutOfRange,
    /// See [`XaiError::Timeout`].
    Timeout,
    /// See [`XaiError::Cancelled`].
    Cancelled,
    /// See [`XaiError::Config`].
    Config,
    /// See [`XaiError::Io`].
    Io,
}

/// What a failure means for the person waiting on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Disposition {
    /// Nothing is wrong with the input; the result is simply not there yet.
    NotYetAvailable,
    /// The input (or its configuration) cannot be explained this way.
    Unexplainable,
    /// The pipeline itself is broken (model, I/O, configuration).
    Fatal,
}

impl XaiError {
    /// Payload-free kind of this error.
    ///
    /// # Example
    /// ```
    /// use dx_core::error::{ErrorKind, XaiError};
    /// let e = XaiError::LayerNotFound { name: "block9".into() };
    /// assert_eq!(e.kind(), ErrorKind::LayerNotFound);
    /// ```
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FeatureExtraction(_) => ErrorKind::FeatureExtraction,
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::Segmentation(_) => ErrorKind::Segmentation,
            Self::InsufficientSamples { .. } => ErrorKind::InsufficientSamples,
            Self::LayerNotFound { .. } => ErrorKind::LayerNotFound,
            Self::GradientUnavailable(_) => ErrorKind::GradientUnavailable,
            Self::TargetClassOutOfRange { .. } => ErrorKind::TargetClassOutOfRange,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Distinguishes "no result yet" from "this input cannot be explained".
    ///
    /// # Example
    /// ```
    /// use dx_core::error::{Disposition, XaiError};
    /// let e = XaiError::Cancelled { stage: "classify" };
    /// assert_eq!(e.disposition(), Disposition::NotYetAvailable);
    /// ```
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::Timeout | ErrorKind::Cancelled => Disposition::NotYetAvailable,
            ErrorKind::FeatureExtraction
            | ErrorKind::Segmentation
            | ErrorKind::InsufficientSamples
            | ErrorKind::TargetClassOutOfRange => Disposition::Unexplainable,
            ErrorKind::ModelUnavailable
            | ErrorKind::LayerNotFound
            | ErrorKind::GradientUnavailable
            | ErrorKind::Config
            | ErrorKind::Io => Disposition::Fatal,
        }
    }

    /// Short message suitable for an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.disposition() {
            Disposition::NotYetAvailable => format!("No result yet ({self}). Try again."),
            Disposition::Unexplainable => format!("This input cannot be processed: {self}"),
            Disposition::Fatal => format!("The analysis pipeline is unavailable: {self}"),
        }
    }
}

impl From<std::io::Error> for XaiError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_not_yet_available() {
        let e = XaiError::Timeout {
            stage: "gradcam",
            limit: Duration::from_millis(10),
        };
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert!(e.user_message().starts_with("No result yet"));
    }

    #[test]
    fn degenerate_inputs_are_unexplainable() {
        let e = XaiError::InsufficientSamples {
            samples: 3,
            regions: 10,
        };
        assert_eq!(e.disposition(), Disposition::Unexplainable);
        assert_eq!(
            XaiError::FeatureExtraction("silent".into()).disposition(),
            Disposition::Unexplainable
        );
    }
}
