use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::XaiError;

/// Side length of every spectral image fed to the models.
pub const IMAGE_SIZE: u32 = 224;

/// Number of color channels of a spectral image.
pub const CHANNELS: usize = 3;

/// Waveform mono + fréquence d'échantillonnage. Immuable une fois chargé.
///
/// # Example
/// ```
/// use dx_core::frame::AudioSample;
/// let a = AudioSample::new(vec![0.0, 0.5, -0.5], 16_000);
/// assert_eq!(a.len(), 3);
/// assert!((a.duration_secs() - 3.0 / 16_000.0).abs() < 1e-9);
/// ```
#[derive(Clone, Debug)]
pub struct AudioSample {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSample {
    /// Wrap mono samples, normalized to [-1, 1].
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Raw samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sampling rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (0.0 for a zero sample rate).
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Raster RGB de la représentation temps-fréquence.
///
/// Stocke les pixels en RGB row-major, 3 bytes par pixel. La vue normalisée
/// [0, 1] est obtenue via [`SpectralImage::normalized`].
///
/// # Example
/// ```
/// use dx_core::frame::SpectralImage;
/// let img = SpectralImage::new(4, 2);
/// assert_eq!(img.data().len(), 4 * 2 * 3);
/// assert_eq!(img.pixel(3, 1), (0, 0, 0));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpectralImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl SpectralImage {
    /// Black image of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * CHANNELS],
            width,
            height,
        }
    }

    /// Build from raw RGB bytes.
    ///
    /// # Errors
    /// Returns `XaiError::FeatureExtraction` if `data` does not hold exactly
    /// `width * height * 3` bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, XaiError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(XaiError::FeatureExtraction(format!(
                "raster holds {} bytes, expected {expected} for {width}×{height}×3",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGB bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable RGB bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume into raw RGB bytes.
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Accès au pixel (x, y) → (r, g, b).
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        debug_assert!(x < self.width && y < self.height, "pixel out of bounds");
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Écrit le pixel (x, y).
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: (u8, u8, u8)) {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[idx] = rgb.0;
        self.data[idx + 1] = rgb.1;
        self.data[idx + 2] = rgb.2;
    }

    /// Pixels divided by 255, shaped (height, width, channel).
    ///
    /// # Example
    /// ```
    /// use dx_core::frame::SpectralImage;
    /// let mut img = SpectralImage::new(2, 2);
    /// img.set_pixel(1, 0, (255, 0, 51));
    /// let t = img.normalized();
    /// assert_eq!(t.dim(), (2, 2, 3));
    /// assert!((t[[0, 1, 0]] - 1.0).abs() < 1e-6);
    /// assert!((t[[0, 1, 2]] - 0.2).abs() < 1e-6);
    /// ```
    #[must_use]
    pub fn normalized(&self) -> Array3<f32> {
        let values: Vec<f32> = self.data.iter().map(|&v| f32::from(v) / 255.0).collect();
        Array3::from_shape_vec(
            (self.height as usize, self.width as usize, CHANNELS),
            values,
        )
        .unwrap_or_else(|_| Array3::zeros((self.height as usize, self.width as usize, CHANNELS)))
    }

    /// Mean of every channel in [0, 255].
    #[must_use]
    pub fn channel_means(&self) -> [f32; CHANNELS] {
        let mut sums = [0.0f64; CHANNELS];
        for px in self.data.chunks_exact(CHANNELS) {
            for (s, &v) in sums.iter_mut().zip(px) {
                *s += f64::from(v);
            }
        }
        let n = self.pixel_count().max(1) as f64;
        [
            (sums[0] / n) as f32,
            (sums[1] / n) as f32,
            (sums[2] / n) as f32,
        ]
    }
}

/// Vocabulaire de classes ordonné et fixe.
///
/// # Example
/// ```
/// use dx_core::frame::ClassVocabulary;
/// let v = ClassVocabulary::default();
/// assert_eq!(v.len(), 2);
/// assert_eq!(v.name(1), Some("fake"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVocabulary {
    names: Vec<String>,
}

impl ClassVocabulary {
    /// Build a vocabulary from ordered class names.
    ///
    /// # Errors
    /// Returns `XaiError::Config` if the list is empty or has duplicates.
    pub fn new<I, S>(names: I) -> Result<Self, XaiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(XaiError::Config("class vocabulary is empty".into()));
        }
        for (i, n) in names.iter().enumerate() {
            if names[..i].contains(n) {
                return Err(XaiError::Config(format!("duplicate class name '{n}'")));
            }
        }
        Ok(Self { names })
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed vocabulary.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of class `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// All names, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for ClassVocabulary {
    fn default() -> Self {
        Self {
            names: vec!["real".to_string(), "fake".to_string()],
        }
    }
}

/// Label + distribution de probabilités sur le vocabulaire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassPrediction {
    /// Index of the predicted class.
    pub label: usize,
    /// Name of the predicted class.
    pub label_name: String,
    /// One probability per class, summing to 1.
    pub probabilities: Vec<f32>,
}

impl ClassPrediction {
    /// Build a prediction from a probability vector. Label is the arg-max,
    /// ties broken by the lowest index.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if the vector length differs from
    /// the vocabulary, or holds negative / non-finite values, or sums to zero.
    ///
    /// # Example
    /// ```
    /// use dx_core::frame::{ClassPrediction, ClassVocabulary};
    /// let p = ClassPrediction::from_probabilities(vec![0.5, 0.5], &ClassVocabulary::default()).unwrap();
    /// assert_eq!(p.label, 0);
    /// assert_eq!(p.label_name, "real");
    /// ```
    pub fn from_probabilities(
        mut probabilities: Vec<f32>,
        vocabulary: &ClassVocabulary,
    ) -> Result<Self, XaiError> {
        if probabilities.len() != vocabulary.len() {
            return Err(XaiError::ModelUnavailable(format!(
                "model outputs {} values, vocabulary has {} classes",
                probabilities.len(),
                vocabulary.len()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(XaiError::ModelUnavailable(
                "model output is not a probability vector".into(),
            ));
        }
        let total: f32 = probabilities.iter().sum();
        if total <= 0.0 {
            return Err(XaiError::ModelUnavailable(
                "model output sums to zero".into(),
            ));
        }
        for p in &mut probabilities {
            *p /= total;
        }
        let label = argmax(&probabilities);
        let label_name = vocabulary.name(label).unwrap_or_default().to_string();
        Ok(Self {
            label,
            label_name,
            probabilities,
        })
    }

    /// Probability of the predicted label.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.label).copied().unwrap_or(0.0)
    }
}

/// Index of the largest value, lowest index on ties. 0 for an empty slice.
///
/// # Example
/// ```
/// use dx_core::frame::argmax;
/// assert_eq!(argmax(&[0.1, 0.7, 0.7]), 1);
/// ```
#[must_use]
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Heatmap mono-canal, valeurs dans [0, 1], même résolution que l'image d'entrée.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaliencyMap {
    /// Row-major values in [0, 1].
    pub values: Vec<f32>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Class the map attributes.
    pub target_class: usize,
    /// (height, width) of the activation grid before upsampling.
    pub activation_size: (usize, usize),
}

impl SaliencyMap {
    /// Value at (x, y).
    #[inline]
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Largest value in the map.
    #[must_use]
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(SpectralImage::from_raw(2, 2, vec![0; 11]).is_err());
        assert!(SpectralImage::from_raw(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn prediction_is_renormalized() {
        let v = ClassVocabulary::default();
        let p = ClassPrediction::from_probabilities(vec![1.0, 3.0], &v).unwrap();
        let sum: f32 = p.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(p.label, 1);
        assert!((p.confidence() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn prediction_rejects_shape_mismatch() {
        let v = ClassVocabulary::default();
        let err = ClassPrediction::from_probabilities(vec![0.2, 0.3, 0.5], &v).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ModelUnavailable);
        assert!(ClassPrediction::from_probabilities(vec![f32::NAN, 1.0], &v).is_err());
        assert!(ClassPrediction::from_probabilities(vec![-0.1, 1.1], &v).is_err());
    }

    #[test]
    fn vocabulary_rejects_duplicates() {
        assert!(ClassVocabulary::new(["a", "a"]).is_err());
        assert!(ClassVocabulary::new(Vec::<String>::new()).is_err());
        assert_eq!(ClassVocabulary::new(["x", "y", "z"]).unwrap().len(), 3);
    }

    #[test]
    fn channel_means_of_flat_image() {
        let mut img = SpectralImage::new(2, 1);
        img.set_pixel(0, 0, (10, 20, 30));
        img.set_pixel(1, 0, (30, 40, 50));
        assert_eq!(img.channel_means(), [20.0, 30.0, 40.0]);
    }
}
