//! Shared types, configuration and model traits for deepfake-xai.
//!
//! This crate contains the value objects passed between the feature
//! extractor, the classifier and the explainers.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod runtime;
pub mod traits;

pub use color::Colormap;
pub use config::PipelineConfig;
pub use error::{Disposition, ErrorKind, XaiError};
pub use frame::{AudioSample, ClassPrediction, ClassVocabulary, SaliencyMap, SpectralImage};
pub use runtime::CancelToken;
pub use traits::{ImageModel, IntrospectableModel, LayerProbe};
