//! Explainers for deepfake-xai classifications.
//!
//! - [`lime`]: perturbation-based local surrogate over quickshift superpixels.
//! - [`gradcam`]: class activation map from a reference network's gradients.

pub mod gradcam;
pub mod lime;
pub mod segmentation;
pub mod surrogate;

pub use gradcam::GradientExplainer;
pub use lime::{LocalSurrogateExplanation, PerturbationExplainer};
pub use segmentation::Segmentation;
