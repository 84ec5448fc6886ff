use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dx_core::frame::{SaliencyMap, SpectralImage};
use dx_explain::LocalSurrogateExplanation;
use dx_render::export::{save_png, save_rgb};
use dx_render::overlay::{heatmap_overlay, mark_boundaries, side_by_side, surrogate_image};
use image::RgbImage;

use crate::pipeline::PipelineReport;

/// Gap between the two panels of a rendering, in pixels.
const PANEL_GAP: u32 = 8;

/// Original | selected regions on black, outlined.
#[must_use]
pub fn render_perturbation(image: &SpectralImage, explanation: &LocalSurrogateExplanation) -> RgbImage {
    let regions = surrogate_image(image, &explanation.mask, true, false);
    side_by_side(image, &mark_boundaries(&regions, &explanation.mask), PANEL_GAP)
}

/// Original | JET heatmap blended over the original.
#[must_use]
pub fn render_gradient(
    image: &SpectralImage,
    saliency: &SaliencyMap,
    image_weight: f32,
    heatmap_weight: f32,
) -> RgbImage {
    let blended = heatmap_overlay(image, saliency, image_weight, heatmap_weight);
    side_by_side(image, &blended, PANEL_GAP)
}

/// Écrit `spectrogram.png`, puis `lime.png` / `gradcam.png` pour chaque
/// explication prête. Returns the written paths.
///
/// # Errors
/// Returns an error if `dir` cannot be created or a PNG cannot be written.
pub fn write_artifacts(
    report: &PipelineReport,
    dir: &Path,
    image_weight: f32,
    heatmap_weight: f32,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create output directory {}", dir.display()))?;
    let mut written = Vec::new();

    let path = dir.join("spectrogram.png");
    save_png(&report.image, &path)?;
    written.push(path);

    if let Some(explanation) = report.perturbation.ready() {
        let path = dir.join("lime.png");
        save_rgb(&render_perturbation(&report.image, explanation), &path)?;
        written.push(path);
    }
    if let Some(saliency) = report.gradient.ready() {
        let path = dir.join("gradcam.png");
        save_rgb(
            &render_gradient(&report.image, saliency, image_weight, heatmap_weight),
            &path,
        )?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExplanationOutcome, StageTimings};
    use dx_core::error::XaiError;
    use dx_core::frame::{ClassPrediction, ClassVocabulary};
    use std::sync::Arc;

    fn report(gradient: ExplanationOutcome<SaliencyMap>) -> PipelineReport {
        PipelineReport {
            image: Arc::new(SpectralImage::new(16, 16)),
            prediction: ClassPrediction::from_probabilities(vec![0.3, 0.7], &ClassVocabulary::default())
                .unwrap(),
            perturbation: ExplanationOutcome::Failed(XaiError::Segmentation("none".into())),
            gradient,
            timings: StageTimings::default(),
        }
    }

    #[test]
    fn writes_only_ready_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let map = SaliencyMap {
            values: vec![0.5; 256],
            width: 16,
            height: 16,
            target_class: 1,
            activation_size: (2, 2),
        };
        let written = write_artifacts(&report(ExplanationOutcome::Ready(map)), dir.path(), 0.6, 0.4).unwrap();
        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        assert_eq!(names, vec!["spectrogram.png", "gradcam.png"]);
        assert!(written.iter().all(|p| p.exists()));

        let panel = image::open(dir.path().join("gradcam.png")).unwrap().to_rgb8();
        assert_eq!(panel.width(), 16 + PANEL_GAP + 16);
    }
}
