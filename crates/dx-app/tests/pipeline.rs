//! End-to-end runs of the orchestrator on synthetic audio.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dx_app::{ExplainRequest, ExplanationOutcome, Pipeline};
use dx_audio::extractor::FeatureExtractor;
use dx_core::config::{Architecture, PerturbationConfig, RuntimeConfig, ScoreKind};
use dx_core::error::{ErrorKind, XaiError};
use dx_core::frame::{AudioSample, ClassVocabulary, IMAGE_SIZE, SpectralImage};
use dx_core::runtime::CancelToken;
use dx_core::traits::ImageModel;
use dx_explain::GradientExplainer;
use dx_model::{Classifier, Network};
use ndarray::Array3;

fn chirp() -> AudioSample {
    let sr = 16_000;
    let samples = (0..sr)
        .map(|i| {
            let t = i as f32 / sr as f32;
            0.5 * (TAU * (200.0 + 1800.0 * t) * t).sin()
        })
        .collect();
    AudioSample::new(samples, sr as u32)
}

fn classifier() -> Classifier {
    Classifier::from_architecture(Architecture::MobileNet, ClassVocabulary::default(), 3).unwrap()
}

fn gradient() -> Result<GradientExplainer, XaiError> {
    let net = Network::from_architecture(Architecture::Vgg, 10, 16)?;
    GradientExplainer::new(Arc::new(net), "block5_conv3", ScoreKind::Probability)
}

fn small_perturbation() -> PerturbationConfig {
    PerturbationConfig {
        num_samples: 30,
        top_k: 4,
        ..PerturbationConfig::default()
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(FeatureExtractor::default(), classifier())
        .with_perturbation(small_perturbation())
        .with_gradient(gradient())
}

#[test]
fn classify_only_skips_explanations() {
    let report = pipeline()
        .run(&chirp(), &ExplainRequest::classify_only(), &CancelToken::new())
        .unwrap();

    assert_eq!(report.image.width(), IMAGE_SIZE);
    assert_eq!(report.image.height(), IMAGE_SIZE);
    let sum: f32 = report.prediction.probabilities.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(report.prediction.label < 2);
    assert!(matches!(report.perturbation, ExplanationOutcome::NotRequested));
    assert!(matches!(report.gradient, ExplanationOutcome::NotRequested));
    assert!(report.timings.perturbation_ms.is_none());
}

#[test]
fn full_run_produces_both_explanations() {
    let report = pipeline()
        .run(&chirp(), &ExplainRequest::all(), &CancelToken::new())
        .unwrap();

    let lime = report.perturbation.ready().expect("perturbation ready");
    assert_eq!(lime.target_class, report.prediction.label);
    assert_eq!(lime.num_samples, 30);
    assert!(lime.selected.len() <= 4);
    assert_eq!(lime.mask.len(), report.image.pixel_count());

    let cam = report.gradient.ready().expect("gradient ready");
    assert_eq!(cam.target_class, report.prediction.label);
    assert_eq!((cam.width, cam.height), (IMAGE_SIZE, IMAGE_SIZE));
    assert!(cam.values.iter().all(|v| (0.0..=1.0).contains(v)));

    let summary = report.summary();
    assert_eq!(summary.perturbation.status, "ready");
    assert_eq!(summary.gradient.status, "ready");
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["label"], report.prediction.label);
}

#[test]
fn silent_audio_is_a_feature_error() {
    let silent = AudioSample::new(vec![0.0; 8_000], 16_000);
    let err = pipeline()
        .run(&silent, &ExplainRequest::all(), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FeatureExtraction);
}

#[test]
fn cancelled_token_stops_the_run() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline()
        .run(&chirp(), &ExplainRequest::all(), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn missing_gradient_explainer_keeps_the_prediction() {
    let layerless = Network::from_architecture(Architecture::MobileNet, 10, 0).unwrap();
    let gradient = GradientExplainer::new(Arc::new(layerless), "block5_conv3", ScoreKind::Probability);
    assert!(matches!(gradient, Err(XaiError::LayerNotFound { .. })));

    let pipeline = Pipeline::new(FeatureExtractor::default(), classifier()).with_gradient(gradient);
    let request = ExplainRequest {
        perturbation: false,
        gradient: true,
        gradient_target: None,
    };
    let report = pipeline
        .run(&chirp(), &request, &CancelToken::new())
        .unwrap();

    assert!(report.prediction.label < 2);
    let err = report.gradient.error().expect("gradient failed");
    assert_eq!(err.kind(), ErrorKind::LayerNotFound);
    assert_eq!(report.summary().gradient.status, "failed");
}

#[test]
fn gradient_target_out_of_range_fails_only_that_outcome() {
    let request = ExplainRequest {
        perturbation: false,
        gradient: true,
        gradient_target: Some(10),
    };
    let report = pipeline()
        .run(&chirp(), &request, &CancelToken::new())
        .unwrap();
    let err = report.gradient.error().expect("gradient failed");
    assert_eq!(err.kind(), ErrorKind::TargetClassOutOfRange);
}

struct Sleepy;

impl ImageModel for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        (224, 224, 3)
    }

    fn num_classes(&self) -> usize {
        2
    }

    fn forward(&self, _input: &Array3<f32>) -> Result<Vec<f32>, XaiError> {
        thread::sleep(Duration::from_millis(500));
        Ok(vec![0.5, 0.5])
    }
}

#[test]
fn slow_inference_times_out() {
    let classifier = Classifier::new(Arc::new(Sleepy), ClassVocabulary::default()).unwrap();
    let pipeline = Pipeline::new(FeatureExtractor::default(), classifier).with_runtime(RuntimeConfig {
        load_timeout_ms: 1_000,
        inference_timeout_ms: 50,
    });
    let image = Arc::new(SpectralImage::new(IMAGE_SIZE, IMAGE_SIZE));
    let err = pipeline
        .run_on_image(image, &ExplainRequest::classify_only(), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, XaiError::Timeout { .. }));
}
