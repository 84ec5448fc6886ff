//! Pipeline orchestration for deepfake-xai: audio → spectral image →
//! classification → optional explanations, plus the artifacts the `dxai`
//! binary writes.

pub mod output;
pub mod pipeline;

pub use pipeline::{ExplainRequest, ExplanationOutcome, Pipeline, PipelineReport};
