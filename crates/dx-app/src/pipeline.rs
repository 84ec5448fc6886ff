use std::sync::Arc;
use std::time::{Duration, Instant};

use dx_audio::FeatureExtractor;
use dx_core::config::{PerturbationConfig, PipelineConfig, RuntimeConfig};
use dx_core::error::{Disposition, ErrorKind, XaiError};
use dx_core::frame::{AudioSample, ClassPrediction, SaliencyMap, SpectralImage};
use dx_core::runtime::{CancelToken, run_with_timeout};
use dx_explain::{GradientExplainer, LocalSurrogateExplanation, PerturbationExplainer};
use dx_model::Classifier;
use serde::Serialize;

/// Explications demandées pour une exécution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExplainRequest {
    /// Run the perturbation (LIME) explainer.
    pub perturbation: bool,
    /// Run the gradient (Grad-CAM) explainer.
    pub gradient: bool,
    /// Class explained by the gradient explainer. Defaults to the predicted
    /// label index, applied to the reference network's classes.
    pub gradient_target: Option<usize>,
}

impl ExplainRequest {
    /// Classification only.
    #[must_use]
    pub fn classify_only() -> Self {
        Self::default()
    }

    /// Both explainers.
    #[must_use]
    pub fn all() -> Self {
        Self {
            perturbation: true,
            gradient: true,
            gradient_target: None,
        }
    }
}

/// Issue d'une étape d'explication optionnelle.
#[derive(Clone, Debug)]
pub enum ExplanationOutcome<T> {
    /// Not asked for.
    NotRequested,
    /// Produced successfully.
    Ready(T),
    /// Failed; the classification stays valid.
    Failed(XaiError),
}

impl<T> ExplanationOutcome<T> {
    /// The explanation, when ready.
    #[must_use]
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(t) => Some(t),
            _ => None,
        }
    }

    /// The failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&XaiError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Short status label: `not_requested`, `ready` or `failed`.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }

    fn from_result(result: Result<T, XaiError>, stage: &str) -> Self {
        match result {
            Ok(t) => Self::Ready(t),
            Err(e) => {
                log::warn!("{stage} failed: {e}");
                Self::Failed(e)
            }
        }
    }
}

/// Wall-clock time spent in each stage.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StageTimings {
    /// Feature extraction (0 when run on a ready image).
    pub extraction_ms: f64,
    /// Classification.
    pub classification_ms: f64,
    /// Perturbation explanation, when run.
    pub perturbation_ms: Option<f64>,
    /// Gradient explanation, when run.
    pub gradient_ms: Option<f64>,
}

/// Résultat complet d'une exécution du pipeline.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    /// Spectral image every stage worked on.
    pub image: Arc<SpectralImage>,
    /// Production classifier decision.
    pub prediction: ClassPrediction,
    /// Perturbation explanation.
    pub perturbation: ExplanationOutcome<LocalSurrogateExplanation>,
    /// Gradient explanation.
    pub gradient: ExplanationOutcome<SaliencyMap>,
    /// Per-stage timings.
    pub timings: StageTimings,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Orchestrateur : extraction → classification → explications optionnelles.
///
/// Extraction and classification failures abort the run with the first error
/// unchanged. Explainer failures are recorded in the report.
pub struct Pipeline {
    extractor: FeatureExtractor,
    classifier: Classifier,
    perturbation: PerturbationConfig,
    gradient: Result<GradientExplainer, XaiError>,
    runtime: RuntimeConfig,
}

impl Pipeline {
    /// Pipeline with default explainer and runtime settings and no reference
    /// network.
    #[must_use]
    pub fn new(extractor: FeatureExtractor, classifier: Classifier) -> Self {
        Self {
            extractor,
            classifier,
            perturbation: PerturbationConfig::default(),
            gradient: Err(XaiError::GradientUnavailable(
                "no reference network configured".into(),
            )),
            runtime: RuntimeConfig::default(),
        }
    }

    /// Perturbation explainer parameters.
    #[must_use]
    pub fn with_perturbation(mut self, config: PerturbationConfig) -> Self {
        self.perturbation = config;
        self
    }

    /// Gradient explainer, or the error that prevented building it.
    #[must_use]
    pub fn with_gradient(mut self, explainer: Result<GradientExplainer, XaiError>) -> Self {
        self.gradient = explainer;
        self
    }

    /// Stage timeouts.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Build every component from configuration. The classifier artifact is
    /// loaded under the load timeout. A reference network that cannot be
    /// built only disables the gradient explainer.
    ///
    /// # Errors
    /// `Config` for an invalid vocabulary, `ModelUnavailable` when no model
    /// path is configured or loading fails, `Timeout` if loading is too slow.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, XaiError> {
        let vocabulary = config.classifier.vocabulary()?;
        let path = config.classifier.model_path.clone().ok_or_else(|| {
            XaiError::ModelUnavailable("no classifier artifact configured".into())
        })?;
        let classifier =
            Classifier::load_with_timeout(path, vocabulary, config.runtime.load_timeout())?;
        let gradient = GradientExplainer::from_config(&config.gradient);
        if let Err(e) = &gradient {
            log::warn!("Gradient explainer disabled: {e}");
        }
        Ok(Self::new(FeatureExtractor::new(config.features.clone()), classifier)
            .with_perturbation(config.perturbation.clone())
            .with_gradient(gradient)
            .with_runtime(config.runtime.clone()))
    }

    /// Production classifier.
    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn limit(&self) -> Duration {
        self.runtime.inference_timeout()
    }

    /// Run on an audio sample.
    ///
    /// # Errors
    /// Extraction or classification failure, timeout or cancellation before
    /// either of them.
    pub fn run(
        &self,
        audio: &AudioSample,
        request: &ExplainRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineReport, XaiError> {
        cancel.check("feature extraction")?;
        let start = Instant::now();
        let extractor = self.extractor.clone();
        let audio = audio.clone();
        let image = run_with_timeout("feature extraction", self.limit(), move || {
            extractor.extract(&audio)
        })?;
        let extraction_ms = elapsed_ms(start);

        let mut report = self.run_on_image(Arc::new(image), request, cancel)?;
        report.timings.extraction_ms = extraction_ms;
        Ok(report)
    }

    /// Run on an already extracted spectral image.
    ///
    /// # Errors
    /// Classification failure, timeout or cancellation before it.
    pub fn run_on_image(
        &self,
        image: Arc<SpectralImage>,
        request: &ExplainRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineReport, XaiError> {
        let mut timings = StageTimings::default();

        cancel.check("classification")?;
        let start = Instant::now();
        let classifier = self.classifier.clone();
        let img = Arc::clone(&image);
        let prediction =
            run_with_timeout("classification", self.limit(), move || classifier.predict(&img))?;
        timings.classification_ms = elapsed_ms(start);
        log::info!(
            "Prediction: {} ({:.3})",
            prediction.label_name,
            prediction.confidence()
        );

        let perturbation = if request.perturbation {
            let start = Instant::now();
            let outcome = ExplanationOutcome::from_result(
                self.explain_perturbation(&image, cancel),
                "Perturbation explanation",
            );
            timings.perturbation_ms = Some(elapsed_ms(start));
            outcome
        } else {
            ExplanationOutcome::NotRequested
        };

        let gradient = if request.gradient {
            let start = Instant::now();
            let target = request.gradient_target.unwrap_or(prediction.label);
            let outcome = ExplanationOutcome::from_result(
                self.explain_gradient(&image, target, cancel),
                "Gradient explanation",
            );
            timings.gradient_ms = Some(elapsed_ms(start));
            outcome
        } else {
            ExplanationOutcome::NotRequested
        };

        Ok(PipelineReport {
            image,
            prediction,
            perturbation,
            gradient,
            timings,
        })
    }

    fn explain_perturbation(
        &self,
        image: &Arc<SpectralImage>,
        cancel: &CancelToken,
    ) -> Result<LocalSurrogateExplanation, XaiError> {
        cancel.check("perturbation explanation")?;
        let explainer =
            PerturbationExplainer::new(self.perturbation.clone()).with_cancel(cancel.clone());
        let config = self.perturbation.clone();
        let classifier = self.classifier.clone();
        let image = Arc::clone(image);
        run_with_timeout("perturbation explanation", self.limit(), move || {
            let predict_batch = |batch: &[SpectralImage]| -> Result<Vec<Vec<f32>>, XaiError> {
                Ok(classifier
                    .predict_batch(batch)?
                    .into_iter()
                    .map(|p| p.probabilities)
                    .collect())
            };
            explainer.explain_batched(&image, &predict_batch, &config, None)
        })
    }

    fn explain_gradient(
        &self,
        image: &Arc<SpectralImage>,
        target: usize,
        cancel: &CancelToken,
    ) -> Result<SaliencyMap, XaiError> {
        cancel.check("gradient explanation")?;
        let explainer = self.gradient.clone()?;
        let image = Arc::clone(image);
        run_with_timeout("gradient explanation", self.limit(), move || {
            explainer.explain(&image, target)
        })
    }
}

/// Error as reported in the JSON summary.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorSummary {
    /// Error kind.
    pub kind: ErrorKind,
    /// Whether a result may still come or the input cannot be explained.
    pub disposition: Disposition,
    /// Human readable message.
    pub message: String,
}

impl From<&XaiError> for ErrorSummary {
    fn from(e: &XaiError) -> Self {
        Self {
            kind: e.kind(),
            disposition: e.disposition(),
            message: e.user_message(),
        }
    }
}

/// Status + payload of one explanation in the JSON summary.
#[derive(Clone, Debug, Serialize)]
pub struct OutcomeSummary<T> {
    /// `not_requested`, `ready` or `failed`.
    pub status: &'static str,
    /// Payload when ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Failure when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

impl<T> OutcomeSummary<T> {
    fn of<S>(outcome: &ExplanationOutcome<S>, summarize: impl FnOnce(&S) -> T) -> Self {
        Self {
            status: outcome.status(),
            result: outcome.ready().map(summarize),
            error: outcome.error().map(ErrorSummary::from),
        }
    }
}

/// Perturbation explanation, without the per-pixel data.
#[derive(Clone, Debug, Serialize)]
pub struct PerturbationSummary {
    /// Explained class.
    pub target_class: usize,
    /// Number of superpixels.
    pub regions: usize,
    /// Samples evaluated.
    pub num_samples: usize,
    /// Weighted R² of the surrogate.
    pub score: f64,
    /// Surrogate intercept.
    pub intercept: f64,
    /// Surrogate output on the unperturbed image.
    pub local_prediction: f64,
    /// Selected `(region, weight)` pairs, strongest first.
    pub top_regions: Vec<(u32, f64)>,
}

/// Gradient explanation, without the per-pixel data.
#[derive(Clone, Debug, Serialize)]
pub struct GradientSummary {
    /// Explained class of the reference network.
    pub target_class: usize,
    /// Activation grid (height, width) before upsampling.
    pub activation_size: (usize, usize),
    /// Mean saliency.
    pub mean: f32,
    /// Peak saliency.
    pub peak: f32,
}

/// Rapport JSON imprimé par le binaire.
#[derive(Clone, Debug, Serialize)]
pub struct ReportSummary {
    /// Predicted label index.
    pub label: usize,
    /// Predicted label name.
    pub label_name: String,
    /// Probability of the label.
    pub confidence: f32,
    /// Full probability vector.
    pub probabilities: Vec<f32>,
    /// Perturbation explanation.
    pub perturbation: OutcomeSummary<PerturbationSummary>,
    /// Gradient explanation.
    pub gradient: OutcomeSummary<GradientSummary>,
    /// Stage timings.
    pub timings: StageTimings,
}

impl PipelineReport {
    /// Serializable summary.
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            label: self.prediction.label,
            label_name: self.prediction.label_name.clone(),
            confidence: self.prediction.confidence(),
            probabilities: self.prediction.probabilities.clone(),
            perturbation: OutcomeSummary::of(&self.perturbation, |e| PerturbationSummary {
                target_class: e.target_class,
                regions: e.segmentation.num_regions(),
                num_samples: e.num_samples,
                score: e.score,
                intercept: e.intercept,
                local_prediction: e.local_prediction,
                top_regions: e.top_regions(),
            }),
            gradient: OutcomeSummary::of(&self.gradient, |m| GradientSummary {
                target_class: m.target_class,
                activation_size: m.activation_size,
                mean: m.values.iter().sum::<f32>() / m.values.len().max(1) as f32,
                peak: m.max(),
            }),
            timings: self.timings.clone(),
        }
    }
}
