use std::time::Instant;

use dx_core::color::rgb_to_lab;
use dx_core::config::SegmentationConfig;
use dx_core::error::XaiError;
use dx_core::frame::SpectralImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Partition d'une image en superpixels contigus (4-connexité).
///
/// Region ids are dense, `0..num_regions()`, assigned in raster order of each
/// region's first pixel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmentation {
    labels: Vec<u32>,
    width: u32,
    height: u32,
    regions: usize,
}

impl Segmentation {
    /// Build from a raw label grid, relabelling connected components densely.
    ///
    /// # Errors
    /// Returns `XaiError::Segmentation` if the grid is empty or its length
    /// differs from `width * height`.
    ///
    /// # Example
    /// ```
    /// use dx_explain::Segmentation;
    /// // label 7 appears in two disconnected places → 3 regions
    /// let seg = Segmentation::from_labels(&[7, 1, 7], 3, 1).unwrap();
    /// assert_eq!(seg.num_regions(), 3);
    /// assert_eq!(seg.labels(), &[0, 1, 2]);
    /// ```
    pub fn from_labels<L: PartialEq + Copy>(
        raw: &[L],
        width: u32,
        height: u32,
    ) -> Result<Self, XaiError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return Err(XaiError::Segmentation("image has no pixels".into()));
        }
        if raw.len() != w * h {
            return Err(XaiError::Segmentation(format!(
                "label grid holds {} values for {width}×{height} pixels",
                raw.len()
            )));
        }

        const UNSET: u32 = u32::MAX;
        let mut labels = vec![UNSET; w * h];
        let mut next = 0u32;
        let mut stack = Vec::new();
        for start in 0..w * h {
            if labels[start] != UNSET {
                continue;
            }
            let value = raw[start];
            labels[start] = next;
            stack.push(start);
            while let Some(i) = stack.pop() {
                let (x, y) = (i % w, i / w);
                let mut visit = |j: usize| {
                    if labels[j] == UNSET && raw[j] == value {
                        labels[j] = next;
                        stack.push(j);
                    }
                };
                if x > 0 {
                    visit(i - 1);
                }
                if x + 1 < w {
                    visit(i + 1);
                }
                if y > 0 {
                    visit(i - w);
                }
                if y + 1 < h {
                    visit(i + w);
                }
            }
            next += 1;
        }

        Ok(Self {
            labels,
            width,
            height,
            regions: next as usize,
        })
    }

    /// Per-pixel region ids, row-major.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Number of regions R.
    #[must_use]
    pub fn num_regions(&self) -> usize {
        self.regions
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

    /// Region id of pixel (x, y).
    #[must_use]
    pub fn label(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }

    /// Pixel count of every region.
    #[must_use]
    pub fn region_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.regions];
        for &l in &self.labels {
            sizes[l as usize] += 1;
        }
        sizes
    }

    /// Mean RGB color of every region.
    #[must_use]
    pub fn region_means(&self, image: &SpectralImage) -> Vec<[u8; 3]> {
        let mut sums = vec![[0u64; 3]; self.regions];
        for (&l, px) in self.labels.iter().zip(image.data().chunks_exact(3)) {
            let s = &mut sums[l as usize];
            for (acc, &v) in s.iter_mut().zip(px) {
                *acc += u64::from(v);
            }
        }
        sums.iter()
            .zip(self.region_sizes())
            .map(|(s, n)| {
                let n = n.max(1) as u64;
                [(s[0] / n) as u8, (s[1] / n) as u8, (s[2] / n) as u8]
            })
            .collect()
    }
}

/// Quickshift : recherche de modes par densité de Parzen dans l'espace
/// (L*a*b* · ratio, y, x), puis relabel des composantes connexes.
///
/// Deterministic: pixels are ordered by (density, lower raster index first),
/// so a flat plateau still forms a single tree; distance ties keep the first
/// candidate in raster order.
///
/// # Errors
/// Returns `XaiError::Segmentation` if the image has no pixels or the
/// parameters are not positive.
pub fn quickshift(
    image: &SpectralImage,
    config: &SegmentationConfig,
) -> Result<Segmentation, XaiError> {
    let start = Instant::now();
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Err(XaiError::Segmentation("image has no pixels".into()));
    }
    if config.kernel_size <= 0.0 || config.max_dist <= 0.0 || config.ratio <= 0.0 {
        return Err(XaiError::Segmentation(format!(
            "invalid quickshift parameters kernel_size={} max_dist={} ratio={}",
            config.kernel_size, config.max_dist, config.ratio
        )));
    }

    let lab: Vec<[f32; 3]> = image
        .data()
        .chunks_exact(3)
        .map(|px| {
            let (l, a, b) = rgb_to_lab(px[0], px[1], px[2]);
            [l * config.ratio, a * config.ratio, b * config.ratio]
        })
        .collect();

    let sigma = config.kernel_size;
    let inv = 1.0 / (2.0 * sigma * sigma);
    let radius = (3.0 * sigma).ceil() as isize;

    let dist2 = |i: usize, j: usize, dy: isize, dx: isize| -> f32 {
        let (p, q) = (&lab[i], &lab[j]);
        let dc = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2);
        dc + (dy * dy + dx * dx) as f32
    };
    let window = |y: usize, x: usize| {
        let y0 = (y as isize - radius).max(0) as usize;
        let y1 = (y as isize + radius + 1).min(h as isize) as usize;
        let x0 = (x as isize - radius).max(0) as usize;
        let x1 = (x as isize + radius + 1).min(w as isize) as usize;
        (y0, y1, x0, x1)
    };

    let density: Vec<f32> = (0..w * h)
        .into_par_iter()
        .map(|i| {
            let (y, x) = (i / w, i % w);
            let (y0, y1, x0, x1) = window(y, x);
            let mut d = 0.0f32;
            for yy in y0..y1 {
                for xx in x0..x1 {
                    let j = yy * w + xx;
                    let dy = yy as isize - y as isize;
                    let dx = xx as isize - x as isize;
                    d += (-dist2(i, j, dy, dx) * inv).exp();
                }
            }
            d
        })
        .collect();

    // Strict total order, so parent links never form a cycle.
    let outranks = |j: usize, i: usize| density[j].total_cmp(&density[i]).then(i.cmp(&j)).is_gt();

    let max_dist2 = config.max_dist * config.max_dist;
    let mut parent: Vec<usize> = (0..w * h)
        .into_par_iter()
        .map(|i| {
            let (y, x) = (i / w, i % w);
            let (y0, y1, x0, x1) = window(y, x);
            let mut best = i;
            let mut closest = f32::INFINITY;
            for yy in y0..y1 {
                for xx in x0..x1 {
                    let j = yy * w + xx;
                    if outranks(j, i) {
                        let dy = yy as isize - y as isize;
                        let dx = xx as isize - x as isize;
                        let d = dist2(i, j, dy, dx);
                        if d < closest {
                            closest = d;
                            best = j;
                        }
                    }
                }
            }
            if closest > max_dist2 { i } else { best }
        })
        .collect();

    // Follow links to the root of each tree.
    for i in 0..parent.len() {
        let mut root = parent[i];
        while parent[root] != root {
            root = parent[root];
        }
        parent[i] = root;
    }

    let seg = Segmentation::from_labels(&parent, image.width(), image.height())?;
    if seg.num_regions() == 0 {
        return Err(XaiError::Segmentation("no regions found".into()));
    }
    log::debug!(
        "Quickshift: {} regions over {w}×{h} in {:.1} ms",
        seg.num_regions(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(seg)
}
