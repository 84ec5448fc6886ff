use dx_core::color::Colormap;
use dx_core::frame::{SaliencyMap, SpectralImage};
use image::{GenericImage, RgbImage};
use rayon::prelude::*;

/// Boundary color used by [`mark_boundaries`] (yellow).
pub const BOUNDARY_COLOR: (u8, u8, u8) = (255, 255, 0);

/// Image of the surrogate explanation, built from a per-pixel region mask.
///
/// `mask` holds one value per pixel: `1` for regions that push towards the
/// explained class, `-1` for regions that push away, `0` elsewhere.
/// With `hide_rest`, unselected pixels are black. With `tint`, the green
/// channel of positive regions (red for negative ones) is raised to the
/// image's maximum.
///
/// # Example
/// ```
/// use dx_core::frame::SpectralImage;
/// use dx_render::overlay::surrogate_image;
/// let mut img = SpectralImage::new(2, 1);
/// img.set_pixel(0, 0, (10, 20, 30));
/// img.set_pixel(1, 0, (40, 50, 60));
/// let out = surrogate_image(&img, &[1, 0], true, false);
/// assert_eq!(out.pixel(0, 0), (10, 20, 30));
/// assert_eq!(out.pixel(1, 0), (0, 0, 0));
/// ```
#[must_use]
pub fn surrogate_image(
    image: &SpectralImage,
    mask: &[i8],
    hide_rest: bool,
    tint: bool,
) -> SpectralImage {
    let mut out = if hide_rest {
        SpectralImage::new(image.width(), image.height())
    } else {
        image.clone()
    };
    let peak = image.data().iter().copied().max().unwrap_or(0);

    let src = image.data();
    for (i, (&m, px)) in mask
        .iter()
        .zip(out.data_mut().chunks_exact_mut(3))
        .enumerate()
    {
        if m == 0 {
            continue;
        }
        px.copy_from_slice(&src[i * 3..i * 3 + 3]);
        if tint {
            let channel = if m < 0 { 0 } else { 1 };
            px[channel] = peak;
        }
    }
    out
}

/// Trace en jaune les frontières entre pixels d'étiquettes différentes
/// (4-voisinage, pixel intérieur marqué).
///
/// # Example
/// ```
/// use dx_core::frame::SpectralImage;
/// use dx_render::overlay::{mark_boundaries, BOUNDARY_COLOR};
/// let img = SpectralImage::new(4, 1);
/// let out = mark_boundaries(&img, &[0, 0, 1, 1]);
/// assert_eq!(out.pixel(0, 0), (0, 0, 0));
/// assert_eq!(out.pixel(1, 0), BOUNDARY_COLOR);
/// assert_eq!(out.pixel(2, 0), BOUNDARY_COLOR);
/// ```
#[must_use]
pub fn mark_boundaries<L: PartialEq + Copy>(image: &SpectralImage, labels: &[L]) -> SpectralImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut out = image.clone();
    if labels.len() != w * h {
        log::warn!(
            "mark_boundaries: {} labels for {}×{} image, skipping",
            labels.len(),
            w,
            h
        );
        return out;
    }
    for y in 0..h {
        for x in 0..w {
            let l = labels[y * w + x];
            let differs = (x > 0 && labels[y * w + x - 1] != l)
                || (x + 1 < w && labels[y * w + x + 1] != l)
                || (y > 0 && labels[(y - 1) * w + x] != l)
                || (y + 1 < h && labels[(y + 1) * w + x] != l);
            if differs {
                out.set_pixel(x as u32, y as u32, BOUNDARY_COLOR);
            }
        }
    }
    out
}

/// Colorise une carte de saillance (JET) et la mélange avec l'image :
/// `image_weight · image + heatmap_weight · heatmap`, saturé à [0, 255].
///
/// Pixels outside the saliency map's extent keep the original color.
///
/// # Example
/// ```
/// use dx_core::frame::{SaliencyMap, SpectralImage};
/// use dx_render::overlay::heatmap_overlay;
/// let img = SpectralImage::new(2, 1);
/// let map = SaliencyMap { values: vec![0.0, 1.0], width: 2, height: 1, target_class: 0, activation_size: (1, 2) };
/// let out = heatmap_overlay(&img, &map, 0.6, 0.4);
/// let (r, _, b) = out.pixel(1, 0);
/// assert!(r > b);
/// ```
#[must_use]
pub fn heatmap_overlay(
    image: &SpectralImage,
    saliency: &SaliencyMap,
    image_weight: f32,
    heatmap_weight: f32,
) -> SpectralImage {
    let lut = Colormap::Jet.lut();
    let mut out = image.clone();
    let w = image.width().min(saliency.width) as usize;
    let row_bytes = image.width() as usize * 3;

    out.data_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .filter(|(y, _)| *y < saliency.height as usize)
        .for_each(|(y, row)| {
            for x in 0..w {
                let v = saliency.values[y * saliency.width as usize + x];
                // uint8 truncation, as the heatmap is quantized before colorizing
                let heat = lut[(255.0 * v.clamp(0.0, 1.0)) as usize];
                let px = &mut row[x * 3..x * 3 + 3];
                for (c, h) in px.iter_mut().zip([heat.0, heat.1, heat.2]) {
                    let blended = image_weight * f32::from(*c) + heatmap_weight * f32::from(h);
                    *c = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        });
    out
}

/// Place deux rasters côte à côte, séparés par `gap` pixels blancs.
///
/// # Example
/// ```
/// use dx_core::frame::SpectralImage;
/// use dx_render::overlay::side_by_side;
/// let a = SpectralImage::new(4, 3);
/// let b = SpectralImage::new(5, 2);
/// let panel = side_by_side(&a, &b, 2);
/// assert_eq!(panel.dimensions(), (11, 3));
/// ```
#[must_use]
pub fn side_by_side(left: &SpectralImage, right: &SpectralImage, gap: u32) -> RgbImage {
    let width = left.width() + gap + right.width();
    let height = left.height().max(right.height());
    let mut panel = RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));

    for (img, x0) in [(left, 0), (right, left.width() + gap)] {
        if let Some(view) = to_rgb_image(img)
            && panel.copy_from(&view, x0, 0).is_err()
        {
            log::warn!("side_by_side: panel copy out of bounds");
        }
    }
    panel
}

/// Convert to an `image` crate buffer.
#[must_use]
pub fn to_rgb_image(img: &SpectralImage) -> Option<RgbImage> {
    RgbImage::from_raw(img.width(), img.height(), img.data().to_vec())
}
