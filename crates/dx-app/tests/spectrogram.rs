//! Segmentation and perturbation explanations on extracted mel spectrograms,
//! with the shipped quickshift defaults.

use std::f32::consts::TAU;
use std::sync::Arc;

use dx_audio::extractor::FeatureExtractor;
use dx_core::config::{Architecture, PerturbationConfig, SegmentationConfig};
use dx_core::error::{ErrorKind, XaiError};
use dx_core::frame::{ClassVocabulary, SpectralImage};
use dx_core::traits::ImageModel;
use dx_explain::PerturbationExplainer;
use dx_explain::segmentation::quickshift;
use dx_model::Classifier;
use ndarray::Array3;

fn sine_spectrogram(freq: f32) -> SpectralImage {
    let sr = 16_000u32;
    let tone: Vec<f32> = (0..sr)
        .map(|i| 0.5 * (TAU * freq * i as f32 / sr as f32).sin())
        .collect();
    FeatureExtractor::default().extract_samples(&tone, sr).unwrap()
}

#[test]
fn sine_spectrogram_has_a_bounded_region_count() {
    let seg = quickshift(&sine_spectrogram(440.0), &SegmentationConfig::default()).unwrap();
    assert!(seg.num_regions() < 1000, "{} regions", seg.num_regions());
}

#[test]
fn perturbation_runs_on_a_real_spectrogram() {
    let image = sine_spectrogram(440.0);
    let clf = Classifier::from_architecture(Architecture::MobileNet, ClassVocabulary::default(), 2)
        .unwrap();
    let explainer = PerturbationExplainer::new(PerturbationConfig::default());
    let exp = explainer
        .explain(&image, |img| clf.probabilities(img), 50, 5)
        .unwrap();

    let regions = exp.segmentation.num_regions();
    assert!(regions < 1000);
    assert_eq!(exp.region_weights.len(), regions);
    assert!(exp.selected.len() <= 5);
    assert!(exp.selected.iter().all(|&id| (id as usize) < regions));
    for (&m, &label) in exp.mask.iter().zip(exp.segmentation.labels()) {
        if m != 0 {
            assert!(exp.selected.contains(&label));
        }
    }
    assert!(exp.region_weights.iter().all(|w| w.is_finite()));
}

struct NanModel;

impl ImageModel for NanModel {
    fn name(&self) -> &str {
        "nan"
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        (224, 224, 3)
    }

    fn num_classes(&self) -> usize {
        2
    }

    fn forward(&self, _input: &Array3<f32>) -> Result<Vec<f32>, XaiError> {
        Ok(vec![f32::NAN, 1.0])
    }
}

#[test]
fn malformed_classifier_output_fails_the_explanation() {
    let clf = Classifier::new(Arc::new(NanModel), ClassVocabulary::default()).unwrap();
    let err = PerturbationExplainer::new(PerturbationConfig::default())
        .explain(&sine_spectrogram(440.0), |img| clf.probabilities(img), 20, 4)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
}
