use std::time::Instant;

use dx_core::config::FeatureConfig;
use dx_core::error::XaiError;
use dx_core::frame::{AudioSample, IMAGE_SIZE, SpectralImage};
use dx_render::raster::render_spectrogram;

use crate::fft::Stft;
use crate::mel::{MelFilterbank, power_to_db};

/// Waveform → image spectrale 224×224×3 (mel, dB relatif au max, colormap fixe).
///
/// Déterministe : même waveform, même fréquence, mêmes paramètres → mêmes octets.
///
/// # Example
/// ```
/// use dx_audio::FeatureExtractor;
/// use dx_core::config::FeatureConfig;
///
/// let sr = 16_000;
/// let tone: Vec<f32> = (0..sr)
///     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr as f32).sin())
///     .collect();
/// let img = FeatureExtractor::new(FeatureConfig::default())
///     .extract_samples(&tone, sr as u32)
///     .unwrap();
/// assert_eq!((img.width(), img.height()), (224, 224));
/// ```
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    /// Create an extractor with fixed transform parameters.
    #[must_use]
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Transform parameters.
    #[must_use]
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract the spectral image of an audio sample.
    ///
    /// # Errors
    /// See [`FeatureExtractor::extract_samples`].
    pub fn extract(&self, audio: &AudioSample) -> Result<SpectralImage, XaiError> {
        self.extract_samples(audio.samples(), audio.sample_rate())
    }

    /// Extract the spectral image of raw mono samples.
    ///
    /// # Errors
    /// Returns `XaiError::FeatureExtraction` if the waveform is empty, holds
    /// non-finite values, has zero dynamic range, the sample rate is 0, the
    /// parameters are inconsistent, or the resulting spectrogram is flat.
    pub fn extract_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<SpectralImage, XaiError> {
        let start = Instant::now();
        self.validate(samples, sample_rate)?;

        let (db, n_mels, frames) = self.log_mel(samples, sample_rate)?;

        let image = render_spectrogram(&db, n_mels, frames, self.config.colormap, IMAGE_SIZE)
            .map_err(|e| XaiError::FeatureExtraction(format!("{e:#}")))?;

        log::info!(
            "Extracted {n_mels}×{frames} mel spectrogram from {} samples @ {sample_rate}Hz in {:.1} ms",
            samples.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(image)
    }

    /// Log-power mel grid, band-major, row 0 = lowest band.
    ///
    /// Returns `(values, n_mels, frames)`. Inputs are not validated.
    ///
    /// # Errors
    /// Returns `XaiError::FeatureExtraction` if the STFT fails.
    pub fn log_mel(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<(Vec<f32>, usize, usize), XaiError> {
        let c = &self.config;
        let mut stft = Stft::new(c.n_fft, c.hop_length);
        let (power, frames) = stft.power(samples)?;
        let bank = MelFilterbank::new(sample_rate, c.n_fft, c.n_mels, c.fmin, c.fmax);
        let mel = bank.apply(&power, frames);
        log::debug!(
            "STFT: {} bins × {frames} frames, mel peak {:.3e}",
            stft.num_bins(),
            mel.iter().copied().fold(0.0f32, f32::max)
        );
        Ok((power_to_db(&mel, c.top_db), c.n_mels, frames))
    }

    fn validate(&self, samples: &[f32], sample_rate: u32) -> Result<(), XaiError> {
        if sample_rate == 0 {
            return Err(XaiError::FeatureExtraction(
                "sampling rate must be positive".into(),
            ));
        }
        if samples.is_empty() {
            return Err(XaiError::FeatureExtraction("empty waveform".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(XaiError::FeatureExtraction(
                "waveform contains non-finite samples".into(),
            ));
        }
        let (lo, hi) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            });
        if hi - lo <= 0.0 {
            return Err(XaiError::FeatureExtraction(
                "waveform has zero dynamic range (silent)".into(),
            ));
        }

        let c = &self.config;
        if c.n_fft == 0 || c.hop_length == 0 || c.n_mels == 0 {
            return Err(XaiError::FeatureExtraction(format!(
                "invalid transform parameters n_fft={} hop={} n_mels={}",
                c.n_fft, c.hop_length, c.n_mels
            )));
        }
        let nyquist = sample_rate as f32 / 2.0;
        let fmax = c.fmax.unwrap_or(nyquist);
        if c.fmin < 0.0 || fmax <= c.fmin || fmax > nyquist {
            return Err(XaiError::FeatureExtraction(format!(
                "mel range {}..{fmax} Hz invalid for {sample_rate} Hz audio",
                c.fmin
            )));
        }
        Ok(())
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::error::ErrorKind;

    fn sine(freq: f32, sr: u32, secs: f32) -> Vec<f32> {
        let n = (sr as f32 * secs) as usize;
        (0..n)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn one_second_sine_gives_224_square_rgb() {
        let img = FeatureExtractor::default()
            .extract_samples(&sine(440.0, 16_000, 1.0), 16_000)
            .unwrap();
        assert_eq!(img.width(), 224);
        assert_eq!(img.height(), 224);
        assert_eq!(img.data().len(), 224 * 224 * 3);
        let t = img.normalized();
        assert!(t.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn extraction_is_byte_identical() {
        let ex = FeatureExtractor::default();
        let wave = sine(1234.5, 22_050, 0.7);
        let a = ex.extract_samples(&wave, 22_050).unwrap();
        let b = ex.extract_samples(&wave, 22_050).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn silence_is_rejected() {
        let err = FeatureExtractor::default()
            .extract_samples(&vec![0.0; 16_000], 16_000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureExtraction);
    }

    #[test]
    fn constant_offset_is_rejected() {
        assert!(
            FeatureExtractor::default()
                .extract_samples(&vec![0.3; 4096], 16_000)
                .is_err()
        );
    }

    #[test]
    fn empty_and_bad_rate_are_rejected() {
        let ex = FeatureExtractor::default();
        assert_eq!(
            ex.extract_samples(&[], 16_000).unwrap_err().kind(),
            ErrorKind::FeatureExtraction
        );
        assert_eq!(
            ex.extract_samples(&sine(440.0, 16_000, 0.1), 0)
                .unwrap_err()
                .kind(),
            ErrorKind::FeatureExtraction
        );
        let mut wave = sine(440.0, 16_000, 0.1);
        wave[10] = f32::NAN;
        assert!(ex.extract_samples(&wave, 16_000).is_err());
    }

    #[test]
    fn low_frequencies_are_drawn_at_the_bottom() {
        let ex = FeatureExtractor::new(FeatureConfig {
            colormap: dx_core::color::Colormap::Gray,
            ..FeatureConfig::default()
        });
        let img = ex.extract_samples(&sine(200.0, 16_000, 1.0), 16_000).unwrap();
        let row_mean = |y: u32| -> f32 {
            (0..224).map(|x| f32::from(img.pixel(x, y).0)).sum::<f32>() / 224.0
        };
        let bottom: f32 = (200..224).map(row_mean).sum();
        let top: f32 = (0..24).map(row_mean).sum();
        assert!(bottom > top, "bottom {bottom} vs top {top}");
    }

    #[test]
    fn sample_struct_path_matches_raw_path() {
        let wave = sine(880.0, 16_000, 0.5);
        let ex = FeatureExtractor::default();
        let a = ex.extract(&AudioSample::new(wave.clone(), 16_000)).unwrap();
        let b = ex.extract_samples(&wave, 16_000).unwrap();
        assert_eq!(a, b);
    }
}
