use dx_core::error::XaiError;
use realfft::RealFftPlanner;

/// Short-time Fourier transform: fenêtres de Hann périodiques, trames
/// centrées (zero-padding de `n_fft / 2` de chaque côté), spectre de puissance.
///
/// Pre-allocates the FFT plan and scratch buffers once.
///
/// # Example
/// ```
/// use dx_audio::fft::Stft;
/// let stft = Stft::new(2048, 512);
/// assert_eq!(stft.num_bins(), 1025);
/// assert_eq!(stft.num_frames(16_000), 32);
/// ```
pub struct Stft {
    n_fft: usize,
    hop: usize,
    input_buf: Vec<f32>,
    spectrum_buf: Vec<realfft::num_complex::Complex<f32>>,
    scratch: Vec<realfft::num_complex::Complex<f32>>,
    plan: std::sync::Arc<dyn realfft::RealToComplex<f32>>,
    /// Periodic Hann window coefficients.
    window: Vec<f32>,
}

impl Stft {
    /// Create an STFT with the given window and hop sizes.
    ///
    /// # Panics
    /// Panics if `n_fft` or `hop` is 0.
    #[must_use]
    pub fn new(n_fft: usize, hop: usize) -> Self {
        assert!(n_fft > 0, "FFT size must be > 0");
        assert!(hop > 0, "hop size must be > 0");

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(n_fft);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        // Periodic Hann (DFT-even), as used for spectral analysis
        let window: Vec<f32> = (0..n_fft)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / n_fft as f64;
                (0.5 - 0.5 * phase.cos()) as f32
            })
            .collect();

        Self {
            n_fft,
            hop,
            input_buf,
            spectrum_buf,
            scratch,
            plan,
            window,
        }
    }

    /// Number of frequency bins (N/2 + 1).
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of centered frames produced for `len` samples.
    #[must_use]
    pub fn num_frames(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    /// FFT window size.
    #[must_use]
    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    /// Power spectrogram |X|², bin-major: `out[bin * frames + frame]`.
    ///
    /// Returns the buffer and the number of frames.
    ///
    /// # Errors
    /// Returns `XaiError::FeatureExtraction` if the FFT rejects a frame.
    ///
    /// # Example
    /// ```
    /// use dx_audio::fft::Stft;
    /// let mut stft = Stft::new(256, 64);
    /// let (power, frames) = stft.power(&vec![0.0f32; 1000]).unwrap();
    /// assert_eq!(frames, 1 + 1000 / 64);
    /// assert_eq!(power.len(), 129 * frames);
    /// ```
    pub fn power(&mut self, samples: &[f32]) -> Result<(Vec<f32>, usize), XaiError> {
        let frames = self.num_frames(samples.len());
        let bins = self.num_bins();
        let pad = self.n_fft / 2;
        let mut out = vec![0.0f32; bins * frames];

        for frame in 0..frames {
            // Position of window sample 0 in the unpadded signal
            let start = (frame * self.hop) as isize - pad as isize;
            for (i, slot) in self.input_buf.iter_mut().enumerate() {
                let idx = start + i as isize;
                *slot = if idx >= 0 && (idx as usize) < samples.len() {
                    samples[idx as usize] * self.window[i]
                } else {
                    0.0
                };
            }

            self.plan
                .process_with_scratch(&mut self.input_buf, &mut self.spectrum_buf, &mut self.scratch)
                .map_err(|e| {
                    XaiError::FeatureExtraction(format!("FFT failed on frame {frame}: {e}"))
                })?;

            for (bin, c) in self.spectrum_buf.iter().enumerate() {
                out[bin * frames + frame] = c.re * c.re + c.im * c.im;
            }
        }

        Ok((out, frames))
    }
}
