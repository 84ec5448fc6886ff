//! Classifier adapter and layered CNN backends for deepfake-xai.
//!
//! The bundled [`Network`] exposes every named layer's activation and the
//! gradient of a class score with respect to it, which the gradient explainer
//! relies on.

pub mod architecture;
pub mod artifact;
pub mod classifier;
pub mod layers;
pub mod network;
pub mod preprocess;

pub use classifier::Classifier;
pub use network::Network;
pub use preprocess::Preprocessing;
