use anyhow::{Result, bail};
use dx_core::color::Colormap;
use dx_core::frame::SpectralImage;

use crate::resize::Resizer;

/// Rend une grille scalaire (lignes = bandes de fréquence, colonnes = trames)
/// en raster RGB plat, sans axes ni marges.
///
/// `values` is row-major `rows × cols`, row 0 being the lowest band. Row 0 is
/// drawn at the bottom of the raster. Values are normalized by the grid's own
/// min/max before the colormap is applied.
///
/// # Errors
/// Returns an error if the grid is empty, `values` has the wrong length, or
/// the grid is constant (nothing to draw).
///
/// # Example
/// ```
/// use dx_core::color::Colormap;
/// use dx_render::raster::render_grid;
/// let img = render_grid(&[0.0, 1.0, 2.0, 3.0], 2, 2, Colormap::Gray).unwrap();
/// assert_eq!((img.width(), img.height()), (2, 2));
/// // highest value (row 1, col 1) sits top-right
/// assert_eq!(img.pixel(1, 0), (255, 255, 255));
/// assert_eq!(img.pixel(0, 1), (0, 0, 0));
/// ```
pub fn render_grid(
    values: &[f32],
    rows: usize,
    cols: usize,
    colormap: Colormap,
) -> Result<SpectralImage> {
    if rows == 0 || cols == 0 {
        bail!("empty grid {rows}×{cols}");
    }
    if values.len() != rows * cols {
        bail!("grid holds {} values, expected {}", values.len(), rows * cols);
    }

    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        bail!("grid has no dynamic range (min = {min}, max = {max})");
    }

    let lut = colormap.lut();
    let mut img = SpectralImage::new(cols as u32, rows as u32);
    for row in 0..rows {
        let y = (rows - 1 - row) as u32;
        for col in 0..cols {
            let t = (values[row * cols + col] - min) / range;
            let idx = (t * 255.0).round().clamp(0.0, 255.0) as usize;
            img.set_pixel(col as u32, y, lut[idx]);
        }
    }
    Ok(img)
}

/// Rend la grille puis la rééchantillonne à `size × size` (bilinéaire).
///
/// # Errors
/// See [`render_grid`]; also fails if resizing fails.
///
/// # Example
/// ```
/// use dx_core::color::Colormap;
/// use dx_render::raster::render_spectrogram;
/// let values: Vec<f32> = (0..128 * 32).map(|i| (i % 97) as f32).collect();
/// let img = render_spectrogram(&values, 128, 32, Colormap::Magma, 224).unwrap();
/// assert_eq!(img.data().len(), 224 * 224 * 3);
/// ```
pub fn render_spectrogram(
    values: &[f32],
    rows: usize,
    cols: usize,
    colormap: Colormap,
    size: u32,
) -> Result<SpectralImage> {
    let native = render_grid(values, rows, cols, colormap)?;
    let mut out = SpectralImage::new(size, size);
    Resizer::new().resize_into(&native, &mut out)?;
    log::debug!("Rendered {rows}×{cols} grid to {size}×{size} raster");
    Ok(out)
}
