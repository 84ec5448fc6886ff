use std::path::Path;

use anyhow::{Context, Result};
use dx_core::frame::SpectralImage;
use image::RgbImage;

use crate::resize::resize_image;

/// Écrit un raster en PNG.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_png(img: &SpectralImage, path: &Path) -> Result<()> {
    let buf = RgbImage::from_raw(img.width(), img.height(), img.data().to_vec())
        .context("Raster size does not match its buffer")?;
    save_rgb(&buf, path)
}

/// Écrit un buffer `image` en PNG.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn save_rgb(buf: &RgbImage, path: &Path) -> Result<()> {
    buf.save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Impossible d'écrire {}", path.display()))?;
    log::info!(
        "Wrote {}×{} image to {}",
        buf.width(),
        buf.height(),
        path.display()
    );
    Ok(())
}

/// Recharge une image (PNG, JPEG, BMP), convertie en RGB et
/// rééchantillonnée à `size × size` si nécessaire.
///
/// # Errors
/// Returns an error if the image cannot be loaded or resized.
///
/// # Example
/// ```no_run
/// use dx_render::export::load_image;
/// let img = load_image(std::path::Path::new("melspectrogram.png"), 224).unwrap();
/// ```
pub fn load_image(path: &Path, size: u32) -> Result<SpectralImage> {
    let img = image::open(path)
        .with_context(|| format!("Impossible de charger {}", path.display()))?;
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let raster = SpectralImage::from_raw(w, h, rgb.into_raw())?;
    if w == size && h == size {
        return Ok(raster);
    }
    resize_image(&raster, size, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mel.png");
        let mut img = SpectralImage::new(224, 224);
        img.set_pixel(3, 7, (250, 10, 99));
        save_png(&img, &path).unwrap();
        let back = load_image(&path, 224).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn loading_resizes_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        save_png(&SpectralImage::new(40, 30), &path).unwrap();
        let back = load_image(&path, 224).unwrap();
        assert_eq!((back.width(), back.height()), (224, 224));
    }
}
