use anyhow::{Context, Result};
use dx_core::frame::SpectralImage;
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer as FirResizer};

/// Resizer réutilisable wrappant fast_image_resize, interpolation bilinéaire.
///
/// # Example
/// ```
/// use dx_render::resize::Resizer;
/// let r = Resizer::new();
/// ```
pub struct Resizer {
    inner: FirResizer,
    options: ResizeOptions,
    /// Scratch copy of the source (fast_image_resize wants `&mut` on it).
    src_buf: Vec<u8>,
}

impl Resizer {
    /// Create a bilinear resizer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: FirResizer::new(),
            options: ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
            src_buf: Vec::new(),
        }
    }

    /// Resize `src` into `dst`. Dimensions of `dst` determine output size.
    ///
    /// # Errors
    /// Returns an error if either image has a zero dimension or the resize fails.
    ///
    /// # Example
    /// ```
    /// use dx_render::resize::Resizer;
    /// use dx_core::frame::SpectralImage;
    /// let mut r = Resizer::new();
    /// let src = SpectralImage::new(100, 40);
    /// let mut dst = SpectralImage::new(50, 50);
    /// r.resize_into(&src, &mut dst).unwrap();
    /// ```
    pub fn resize_into(&mut self, src: &SpectralImage, dst: &mut SpectralImage) -> Result<()> {
        if src.width() == dst.width() && src.height() == dst.height() {
            dst.data_mut().copy_from_slice(src.data());
            return Ok(());
        }

        self.src_buf.clear();
        self.src_buf.extend_from_slice(src.data());

        let src_image =
            Image::from_slice_u8(src.width(), src.height(), &mut self.src_buf, PixelType::U8x3)
                .context("Invalid source dimensions")?;

        let (w, h) = (dst.width(), dst.height());
        let mut dst_image = Image::from_slice_u8(w, h, dst.data_mut(), PixelType::U8x3)
            .context("Invalid destination dimensions")?;

        self.inner
            .resize(&src_image, &mut dst_image, Some(&self.options))
            .context("Resize failed")?;

        Ok(())
    }
}

impl Default for Resizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for one-shot usage.
///
/// # Errors
/// Returns an error if the resize operation fails.
///
/// # Example
/// ```
/// use dx_render::resize::resize_image;
/// use dx_core::frame::SpectralImage;
/// let src = SpectralImage::new(128, 32);
/// let dst = resize_image(&src, 224, 224).unwrap();
/// assert_eq!((dst.width(), dst.height()), (224, 224));
/// ```
pub fn resize_image(src: &SpectralImage, width: u32, height: u32) -> Result<SpectralImage> {
    let mut dst = SpectralImage::new(width, height);
    let mut resizer = Resizer::new();
    resizer.resize_into(src, &mut dst)?;
    Ok(dst)
}

/// Bilinear resampling of a single-channel f32 grid, half-pixel centres
/// (same sampling grid as OpenCV `INTER_LINEAR`).
///
/// `src` is row-major `src_h × src_w`. Returns a row-major `dst_h × dst_w` grid.
/// An empty source yields a zero grid.
///
/// # Example
/// ```
/// use dx_render::resize::upsample_bilinear;
/// let out = upsample_bilinear(&[0.0, 1.0], 1, 2, 1, 4);
/// assert_eq!(out.len(), 4);
/// assert!(out[0] < out[3]);
/// ```
#[must_use]
pub fn upsample_bilinear(
    src: &[f32],
    src_h: usize,
    src_w: usize,
    dst_h: usize,
    dst_w: usize,
) -> Vec<f32> {
    let mut out = vec![0.0f32; dst_h * dst_w];
    if src_h == 0 || src_w == 0 || src.len() < src_h * src_w {
        return out;
    }

    let axis = |dst: usize, n_dst: usize, n_src: usize| -> (usize, usize, f32) {
        let scale = n_src as f32 / n_dst as f32;
        let pos = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (pos.floor() as usize).min(n_src - 1);
        let i1 = (i0 + 1).min(n_src - 1);
        (i0, i1, pos - i0 as f32)
    };

    let cols: Vec<(usize, usize, f32)> = (0..dst_w).map(|x| axis(x, dst_w, src_w)).collect();
    for y in 0..dst_h {
        let (y0, y1, fy) = axis(y, dst_h, src_h);
        let fy = fy.clamp(0.0, 1.0);
        for (x, &(x0, x1, fx)) in cols.iter().enumerate() {
            let fx = fx.clamp(0.0, 1.0);
            let top = src[y0 * src_w + x0] * (1.0 - fx) + src[y0 * src_w + x1] * fx;
            let bottom = src[y1 * src_w + x0] * (1.0 - fx) + src[y1 * src_w + x1] * fx;
            out[y * dst_w + x] = top * (1.0 - fy) + bottom * fy;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_stays_flat() {
        let mut src = SpectralImage::new(13, 7);
        for px in src.data_mut().chunks_exact_mut(3) {
            px.copy_from_slice(&[40, 80, 120]);
        }
        let dst = resize_image(&src, 224, 224).unwrap();
        for px in dst.data().chunks_exact(3) {
            for (&v, want) in px.iter().zip([40i16, 80, 120]) {
                assert!((i16::from(v) - want).abs() <= 1, "got {px:?}");
            }
        }
    }

    #[test]
    fn upsample_preserves_range() {
        let src = [0.0, 0.25, 0.5, 1.0];
        let out = upsample_bilinear(&src, 2, 2, 14, 14);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[14 * 14 - 1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn upsample_empty_source_is_zero() {
        let out = upsample_bilinear(&[], 0, 0, 3, 3);
        assert_eq!(out, vec![0.0; 9]);
    }
}
