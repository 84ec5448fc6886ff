/// Banc de filtres mel (échelle Slaney, normalisation d'aire Slaney).
///
/// Weights are stored band-major: `weights[band * n_bins + bin]`.
///
/// # Example
/// ```
/// use dx_audio::mel::MelFilterbank;
/// let fb = MelFilterbank::new(16_000, 2048, 128, 0.0, None);
/// assert_eq!(fb.n_mels(), 128);
/// assert_eq!(fb.n_bins(), 1025);
/// ```
pub struct MelFilterbank {
    weights: Vec<f32>,
    n_mels: usize,
    n_bins: usize,
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Hz → mel, Slaney scale (linear below 1 kHz, logarithmic above).
///
/// # Example
/// ```
/// use dx_audio::mel::hz_to_mel;
/// assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Mel → Hz, inverse of [`hz_to_mel`].
#[must_use]
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

impl MelFilterbank {
    /// Build triangular filters spanning `fmin..fmax` (`None` = Nyquist).
    #[must_use]
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: Option<f32>) -> Self {
        let sr = f64::from(sample_rate);
        let n_bins = n_fft / 2 + 1;
        let fmax = fmax.map_or(sr / 2.0, f64::from);

        let fft_freqs: Vec<f64> = (0..n_bins)
            .map(|i| i as f64 * sr / n_fft as f64)
            .collect();

        let mel_min = hz_to_mel(f64::from(fmin));
        let mel_max = hz_to_mel(fmax);
        let mel_f: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
            .collect();

        let mut weights = vec![0.0f32; n_mels * n_bins];
        let mut empty = 0usize;
        for band in 0..n_mels {
            let (lo, center, hi) = (mel_f[band], mel_f[band + 1], mel_f[band + 2]);
            let enorm = 2.0 / (hi - lo);
            let row = &mut weights[band * n_bins..(band + 1) * n_bins];
            for (w, &f) in row.iter_mut().zip(&fft_freqs) {
                let lower = (f - lo) / (center - lo);
                let upper = (hi - f) / (hi - center);
                *w = (lower.min(upper).max(0.0) * enorm) as f32;
            }
            if row.iter().all(|&w| w == 0.0) {
                empty += 1;
            }
        }
        if empty > 0 {
            log::debug!("{empty} of {n_mels} mel bands cover no FFT bin (n_fft = {n_fft})");
        }

        Self {
            weights,
            n_mels,
            n_bins,
        }
    }

    /// Number of mel bands.
    #[must_use]
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Number of FFT bins expected on input.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Project a bin-major power spectrogram onto the mel bands.
    ///
    /// Returns a band-major grid `out[band * frames + frame]`.
    #[must_use]
    pub fn apply(&self, power: &[f32], frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; self.n_mels * frames];
        for band in 0..self.n_mels {
            let row = &self.weights[band * self.n_bins..(band + 1) * self.n_bins];
            let dst = &mut out[band * frames..(band + 1) * frames];
            for (bin, &w) in row.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let src = &power[bin * frames..(bin + 1) * frames];
                for (d, &p) in dst.iter_mut().zip(src) {
                    *d += w * p;
                }
            }
        }
        out
    }
}

/// Conversion puissance → dB relative au maximum du signal, plancher à
/// `max - top_db`. Le maximum vaut donc 0 dB.
///
/// # Example
/// ```
/// use dx_audio::mel::power_to_db;
/// let db = power_to_db(&[1.0, 0.1, 0.0], 80.0);
/// assert!((db[0] - 0.0).abs() < 1e-5);
/// assert!((db[1] + 10.0).abs() < 1e-4);
/// assert!((db[2] + 80.0).abs() < 1e-4);
/// ```
#[must_use]
pub fn power_to_db(power: &[f32], top_db: f32) -> Vec<f32> {
    const AMIN: f32 = 1e-10;
    let reference = power.iter().copied().fold(0.0f32, f32::max);
    let ref_db = 10.0 * reference.max(AMIN).log10();

    let mut db: Vec<f32> = power
        .iter()
        .map(|&p| 10.0 * p.max(AMIN).log10() - ref_db)
        .collect();

    let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;
    for v in &mut db {
        *v = v.max(floor);
    }
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_roundtrip() {
        for hz in [0.0, 250.0, 999.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6, "{hz}");
        }
    }

    #[test]
    fn filters_cover_the_spectrum() {
        let fb = MelFilterbank::new(22_050, 2048, 128, 0.0, None);
        let covered = (1..fb.n_bins() - 1)
            .filter(|&bin| (0..fb.n_mels()).any(|m| fb.weights[m * fb.n_bins + bin] > 0.0))
            .count();
        assert_eq!(covered, fb.n_bins() - 2);
    }

    #[test]
    fn apply_concentrates_tone_energy() {
        let fb = MelFilterbank::new(16_000, 512, 40, 0.0, None);
        let frames = 2;
        let mut power = vec![0.0f32; fb.n_bins() * frames];
        // 2 kHz → bin 64
        power[64 * frames] = 1.0;
        power[64 * frames + 1] = 1.0;
        let mel = fb.apply(&power, frames);
        let loudest = (0..fb.n_mels())
            .max_by(|&a, &b| mel[a * frames].total_cmp(&mel[b * frames]))
            .unwrap();
        let center = mel_to_hz(
            hz_to_mel(0.0) + (hz_to_mel(8000.0) - hz_to_mel(0.0)) * (loudest + 1) as f64 / 41.0,
        );
        assert!((center - 2000.0).abs() < 250.0, "band {loudest} centred at {center} Hz");
    }

    #[test]
    fn db_floor_applies() {
        let db = power_to_db(&[1e-20, 1.0], 80.0);
        assert!((db[0] + 80.0).abs() < 1e-4);
    }
}
