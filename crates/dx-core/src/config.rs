use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::color::Colormap;
use crate::error::XaiError;
use crate::frame::ClassVocabulary;

/// Configuration complète du pipeline, sérialisable en TOML.
///
/// Chaque champ a une valeur par défaut saine; un fichier partiel ne remplace
/// que les clés présentes.
///
/// # Example
/// ```
/// use dx_core::config::PipelineConfig;
/// let config = PipelineConfig::default();
/// assert_eq!(config.features.n_mels, 128);
/// assert_eq!(config.perturbation.num_samples, 1000);
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Feature Extractor parameters.
    pub features: FeatureConfig,
    /// Classifier Adapter parameters.
    pub classifier: ClassifierConfig,
    /// Perturbation (LIME) explainer parameters.
    pub perturbation: PerturbationConfig,
    /// Gradient (Grad-CAM) explainer parameters.
    pub gradient: GradientConfig,
    /// Timeouts.
    pub runtime: RuntimeConfig,
}

/// Paramètres de la transformée mel.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FeatureConfig {
    /// FFT window length in samples.
    pub n_fft: usize,
    /// Hop between frames in samples.
    pub hop_length: usize,
    /// Number of mel bands.
    pub n_mels: usize,
    /// Lowest filter frequency in Hz.
    pub fmin: f32,
    /// Highest filter frequency in Hz. `None` = Nyquist.
    pub fmax: Option<f32>,
    /// Dynamic range kept below the maximum, in dB.
    pub top_db: f32,
    /// Colormap used to render the dB grid.
    pub colormap: Colormap,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            top_db: 80.0,
            colormap: Colormap::Magma,
        }
    }
}

/// Architecture presets of the bundled convolutional backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Narrow, strided network.
    #[default]
    MobileNet,
    /// Mixed-width stages.
    Inception,
    /// Stacked 3×3 blocks named `blockN_convM`.
    Vgg,
    /// Small custom CNN.
    Custom,
}

impl Architecture {
    /// Parse a CLI-style name.
    ///
    /// # Errors
    /// Returns `XaiError::Config` for unknown names.
    ///
    /// # Example
    /// ```
    /// use dx_core::config::Architecture;
    /// assert_eq!(Architecture::parse("vgg").unwrap(), Architecture::Vgg);
    /// assert!(Architecture::parse("resnet").is_err());
    /// ```
    pub fn parse(name: &str) -> Result<Self, XaiError> {
        match name.to_ascii_lowercase().as_str() {
            "mobilenet" => Ok(Self::MobileNet),
            "inception" => Ok(Self::Inception),
            "vgg" => Ok(Self::Vgg),
            "custom" | "cnn" => Ok(Self::Custom),
            other => Err(XaiError::Config(format!("unknown architecture '{other}'"))),
        }
    }
}

/// Paramètres du classifieur de production.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Ordered class names.
    pub classes: Vec<String>,
    /// Weight artifact path.
    pub model_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            classes: vec!["real".to_string(), "fake".to_string()],
            model_path: None,
        }
    }
}

impl ClassifierConfig {
    /// Vocabulary built from `classes`.
    ///
    /// # Errors
    /// Returns `XaiError::Config` if the class list is empty or has duplicates.
    pub fn vocabulary(&self) -> Result<ClassVocabulary, XaiError> {
        ClassVocabulary::new(self.classes.iter().cloned())
    }
}

/// Remplissage des régions masquées.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HideColor {
    /// Constant byte value on every channel.
    Value(u8),
    /// Each region's own mean color.
    SegmentMean,
}

impl Default for HideColor {
    fn default() -> Self {
        Self::Value(0)
    }
}

/// Quickshift superpixel parameters.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SegmentationConfig {
    /// Width of the Gaussian density kernel.
    pub kernel_size: f32,
    /// Links longer than this cut the tree.
    pub max_dist: f32,
    /// Color vs. space trade-off, in [0, 1].
    pub ratio: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            kernel_size: 4.0,
            max_dist: 200.0,
            ratio: 0.2,
        }
    }
}

/// Paramètres de l'explication par perturbation (LIME).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PerturbationConfig {
    /// Number of perturbed samples, including the unperturbed one.
    pub num_samples: usize,
    /// Number of regions kept in the explanation mask.
    pub top_k: usize,
    /// Seed of the sampling RNG.
    pub seed: u64,
    /// Probability that a region is kept in a sample.
    pub inclusion_probability: f64,
    /// Width of the exponential proximity kernel.
    pub kernel_width: f32,
    /// Ridge penalty. 0 = ordinary least squares.
    pub ridge_alpha: f32,
    /// Fill of excluded regions.
    pub hide_color: HideColor,
    /// Keep only positively contributing regions.
    pub positive_only: bool,
    /// Ignore regions whose |weight| is below this.
    pub min_weight: f32,
    /// Samples evaluated between two cancellation checks.
    pub batch_size: usize,
    /// Superpixel parameters.
    pub segmentation: SegmentationConfig,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            top_k: 8,
            seed: 0,
            inclusion_probability: 0.5,
            kernel_width: 0.25,
            ridge_alpha: 1.0,
            hide_color: HideColor::Value(0),
            positive_only: false,
            min_weight: 0.0,
            batch_size: 10,
            segmentation: SegmentationConfig::default(),
        }
    }
}

/// Score differentiated by the gradient explainer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// Softmax output of the target class.
    #[default]
    Probability,
    /// Pre-softmax logit of the target class.
    Logit,
}

/// Paramètres de Grad-CAM et du réseau de référence.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GradientConfig {
    /// Designated late convolutional layer.
    pub layer: String,
    /// Reference network preset, used when no weights file is given.
    pub architecture: Architecture,
    /// Output classes of the reference network.
    pub num_classes: usize,
    /// Initialization seed of the reference network.
    pub seed: u64,
    /// Optional reference weight artifact.
    pub weights_path: Option<PathBuf>,
    /// Differentiated score.
    pub score: ScoreKind,
    /// Weight of the original image in the overlay.
    pub image_weight: f32,
    /// Weight of the heatmap in the overlay.
    pub heatmap_weight: f32,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            layer: "block5_conv3".to_string(),
            architecture: Architecture::Vgg,
            num_classes: 1000,
            seed: 16,
            weights_path: None,
            score: ScoreKind::Probability,
            image_weight: 0.6,
            heatmap_weight: 0.4,
        }
    }
}

/// Bornes temporelles des unités de travail.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Limit for model loading, in milliseconds.
    pub load_timeout_ms: u64,
    /// Limit for each inference stage, in milliseconds.
    pub inference_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 30_000,
            inference_timeout_ms: 300_000,
        }
    }
}

impl RuntimeConfig {
    /// Model load limit.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Inference limit.
    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

impl PipelineConfig {
    /// Clamp every value to its valid range.
    pub fn clamp_all(&mut self) {
        let f = &mut self.features;
        f.n_fft = f.n_fft.clamp(16, 1 << 16);
        f.hop_length = f.hop_length.clamp(1, f.n_fft);
        f.n_mels = f.n_mels.clamp(1, 512);
        f.fmin = f.fmin.max(0.0);
        f.top_db = f.top_db.clamp(1.0, 200.0);

        let p = &mut self.perturbation;
        p.top_k = p.top_k.max(1);
        p.inclusion_probability = p.inclusion_probability.clamp(0.0, 1.0);
        p.kernel_width = p.kernel_width.max(1e-3);
        p.ridge_alpha = p.ridge_alpha.max(0.0);
        p.min_weight = p.min_weight.max(0.0);
        p.batch_size = p.batch_size.max(1);
        p.segmentation.kernel_size = p.segmentation.kernel_size.max(0.5);
        p.segmentation.max_dist = p.segmentation.max_dist.max(0.0);
        p.segmentation.ratio = p.segmentation.ratio.clamp(0.0, 1.0);

        let g = &mut self.gradient;
        g.num_classes = g.num_classes.max(1);
        g.image_weight = g.image_weight.clamp(0.0, 1.0);
        g.heatmap_weight = g.heatmap_weight.clamp(0.0, 1.0);

        self.runtime.load_timeout_ms = self.runtime.load_timeout_ms.max(1);
        self.runtime.inference_timeout_ms = self.runtime.inference_timeout_ms.max(1);
    }
}

// Fichier TOML : toutes les clés optionnelles, superposées aux défauts.
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    features: FeatureSection,
    #[serde(default)]
    classifier: ClassifierSection,
    #[serde(default)]
    perturbation: PerturbationSection,
    #[serde(default)]
    gradient: GradientSection,
    #[serde(default)]
    runtime: RuntimeSection,
}

#[derive(Deserialize, Default)]
struct FeatureSection {
    n_fft: Option<usize>,
    hop_length: Option<usize>,
    n_mels: Option<usize>,
    fmin: Option<f32>,
    fmax: Option<f32>,
    top_db: Option<f32>,
    colormap: Option<Colormap>,
}

#[derive(Deserialize, Default)]
struct ClassifierSection {
    classes: Option<Vec<String>>,
    model_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct PerturbationSection {
    num_samples: Option<usize>,
    top_k: Option<usize>,
    seed: Option<u64>,
    inclusion_probability: Option<f64>,
    kernel_width: Option<f32>,
    ridge_alpha: Option<f32>,
    hide_color: Option<HideColor>,
    positive_only: Option<bool>,
    min_weight: Option<f32>,
    batch_size: Option<usize>,
    kernel_size: Option<f32>,
    max_dist: Option<f32>,
    ratio: Option<f32>,
}

#[derive(Deserialize, Default)]
struct GradientSection {
    layer: Option<String>,
    architecture: Option<Architecture>,
    num_classes: Option<usize>,
    seed: Option<u64>,
    weights_path: Option<PathBuf>,
    score: Option<ScoreKind>,
    image_weight: Option<f32>,
    heatmap_weight: Option<f32>,
}

#[derive(Deserialize, Default)]
struct RuntimeSection {
    load_timeout_ms: Option<u64>,
    inference_timeout_ms: Option<u64>,
}

macro_rules! overlay {
    ($target:expr, $section:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $section.$field {
                $target.$field = v;
            }
        )+
    };
}

/// Parse a TOML document on top of the defaults.
///
/// # Errors
/// Returns an error if the document is not valid TOML for this schema.
///
/// # Example
/// ```
/// use dx_core::config::parse_config;
/// let c = parse_config("[perturbation]\nnum_samples = 64\n").unwrap();
/// assert_eq!(c.perturbation.num_samples, 64);
/// assert_eq!(c.perturbation.top_k, 8);
/// ```
pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;
    let mut config = PipelineConfig::default();

    let f = file.features;
    overlay!(config.features, f; n_fft, hop_length, n_mels, fmin, top_db, colormap);
    if f.fmax.is_some() {
        config.features.fmax = f.fmax;
    }

    let c = file.classifier;
    overlay!(config.classifier, c; classes);
    if c.model_path.is_some() {
        config.classifier.model_path = c.model_path;
    }

    let p = file.perturbation;
    overlay!(
        config.perturbation, p;
        num_samples, top_k, seed, inclusion_probability, kernel_width,
        ridge_alpha, hide_color, positive_only, min_weight, batch_size,
    );
    overlay!(config.perturbation.segmentation, p; kernel_size, max_dist, ratio);

    let g = file.gradient;
    overlay!(
        config.gradient, g;
        layer, architecture, num_classes, seed, score, image_weight, heatmap_weight,
    );
    if g.weights_path.is_some() {
        config.gradient.weights_path = g.weights_path;
    }

    let r = file.runtime;
    overlay!(config.runtime, r; load_timeout_ms, inference_timeout_ms);

    config.clamp_all();
    Ok(config)
}

/// Load a TOML config file on top of the defaults.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Configuration invalide dans {}", path.display()))?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let c = parse_config(
            r#"
            [features]
            n_mels = 64
            colormap = "viridis"

            [gradient]
            layer = "block4_conv3"
            score = "logit"
            "#,
        )
        .unwrap();
        assert_eq!(c.features.n_mels, 64);
        assert_eq!(c.features.colormap, Colormap::Viridis);
        assert_eq!(c.features.n_fft, 2048);
        assert_eq!(c.gradient.layer, "block4_conv3");
        assert_eq!(c.gradient.score, ScoreKind::Logit);
        assert_eq!(c.gradient.num_classes, 1000);
    }

    #[test]
    fn hide_color_variants_parse() {
        let c = parse_config("[perturbation]\nhide_color = \"segment_mean\"\n").unwrap();
        assert_eq!(c.perturbation.hide_color, HideColor::SegmentMean);
        let c = parse_config("[perturbation]\nhide_color = { value = 128 }\n").unwrap();
        assert_eq!(c.perturbation.hide_color, HideColor::Value(128));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let c = parse_config(
            "[perturbation]\ntop_k = 0\ninclusion_probability = 3.0\nridge_alpha = -1.0\n",
        )
        .unwrap();
        assert_eq!(c.perturbation.top_k, 1);
        assert!((c.perturbation.inclusion_probability - 1.0).abs() < f64::EPSILON);
        assert!(c.perturbation.ridge_alpha.abs() < f32::EPSILON);
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\ninference_timeout_ms = 1500").unwrap();
        let c = load_config(file.path()).unwrap();
        assert_eq!(c.runtime.inference_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(parse_config("[features\nn_mels = ").is_err());
    }
}
