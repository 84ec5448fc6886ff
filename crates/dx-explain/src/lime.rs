use std::time::Instant;

use dx_core::config::{HideColor, PerturbationConfig};
use dx_core::error::XaiError;
use dx_core::frame::{SpectralImage, argmax};
use dx_core::runtime::CancelToken;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::segmentation::{Segmentation, quickshift};
use crate::surrogate::fit_weighted_ridge;

/// Résultat de l'explication par perturbation (modèle de substitution local).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalSurrogateExplanation {
    /// Explained class index.
    pub target_class: usize,
    /// Classifier probability of `target_class` on the unperturbed image.
    pub target_probability: f32,
    /// Signed contribution of every region, indexed by region id.
    pub region_weights: Vec<f64>,
    /// Surrogate intercept.
    pub intercept: f64,
    /// Weighted R² of the surrogate on the samples.
    pub score: f64,
    /// Surrogate output for the unperturbed image.
    pub local_prediction: f64,
    /// Selected region ids, strongest first.
    pub selected: Vec<u32>,
    /// Number of perturbation samples evaluated.
    pub num_samples: usize,
    /// Superpixels the weights refer to.
    pub segmentation: Segmentation,
    /// Per pixel: `1` selected with positive weight, `-1` negative, `0` none.
    pub mask: Vec<i8>,
}

impl LocalSurrogateExplanation {
    /// Weight of region `id` (0.0 for unknown ids).
    #[must_use]
    pub fn weight(&self, id: u32) -> f64 {
        self.region_weights.get(id as usize).copied().unwrap_or(0.0)
    }

    /// `(id, weight)` of the selected regions, strongest first.
    #[must_use]
    pub fn top_regions(&self) -> Vec<(u32, f64)> {
        self.selected.iter().map(|&id| (id, self.weight(id))).collect()
    }
}

/// Explicateur par perturbation de superpixels (LIME).
///
/// The classifier is only reached through `predict_fn`, which maps an image
/// to one probability per class.
#[derive(Clone, Debug, Default)]
pub struct PerturbationExplainer {
    config: PerturbationConfig,
    cancel: CancelToken,
}

impl PerturbationExplainer {
    /// Explainer with the given defaults.
    #[must_use]
    pub fn new(config: PerturbationConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Check `cancel` between sample batches.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Default parameters.
    #[must_use]
    pub fn config(&self) -> &PerturbationConfig {
        &self.config
    }

    /// Explain the predicted class of `image` with `num_samples` perturbations,
    /// keeping at most `top_k` regions.
    ///
    /// # Errors
    /// See [`PerturbationExplainer::explain_with`].
    pub fn explain<F>(
        &self,
        image: &SpectralImage,
        predict_fn: F,
        num_samples: usize,
        top_k: usize,
    ) -> Result<LocalSurrogateExplanation, XaiError>
    where
        F: Fn(&SpectralImage) -> Result<Vec<f32>, XaiError> + Sync,
    {
        let config = PerturbationConfig {
            num_samples,
            top_k,
            ..self.config.clone()
        };
        self.explain_with(image, &predict_fn, &config, None)
    }

    /// Full-control variant. `target` defaults to the predicted label of the
    /// unperturbed image.
    ///
    /// # Errors
    /// See [`PerturbationExplainer::explain_batched`].
    pub fn explain_with<F>(
        &self,
        image: &SpectralImage,
        predict_fn: &F,
        config: &PerturbationConfig,
        target: Option<usize>,
    ) -> Result<LocalSurrogateExplanation, XaiError>
    where
        F: Fn(&SpectralImage) -> Result<Vec<f32>, XaiError> + Sync,
    {
        let per_image = |batch: &[SpectralImage]| -> Result<Vec<Vec<f32>>, XaiError> {
            batch.par_iter().map(predict_fn).collect()
        };
        self.explain_batched(image, &per_image, config, target)
    }

    /// Same as [`PerturbationExplainer::explain_with`], but every batch of
    /// `batch_size` perturbed images goes through one `predict_batch` call,
    /// which must return one probability vector per image, in order.
    ///
    /// # Errors
    /// - `Segmentation` if the image yields no regions,
    /// - `InsufficientSamples` if `num_samples` is 0, or below R + 1 without
    ///   regularisation,
    /// - `TargetClassOutOfRange` if `target` exceeds the class count,
    /// - `ModelUnavailable` if a batch result has the wrong length or a
    ///   non-finite score,
    /// - `Cancelled` if the token fires between batches,
    /// - any error returned by `predict_batch`.
    pub fn explain_batched<B>(
        &self,
        image: &SpectralImage,
        predict_batch: &B,
        config: &PerturbationConfig,
        target: Option<usize>,
    ) -> Result<LocalSurrogateExplanation, XaiError>
    where
        B: Fn(&[SpectralImage]) -> Result<Vec<Vec<f32>>, XaiError> + Sync,
    {
        let start = Instant::now();
        self.cancel.check("segmentation")?;
        let seg = quickshift(image, &config.segmentation)?;
        let regions = seg.num_regions();
        let n = config.num_samples;
        if n == 0 || (config.ridge_alpha <= 0.0 && n < regions + 1) {
            return Err(XaiError::InsufficientSamples {
                samples: n,
                regions,
            });
        }
        if n < regions + 1 {
            log::info!("{n} samples for {regions} regions: ridge fit is underdetermined");
        }

        let base = predict_batch(std::slice::from_ref(image))?
            .into_iter()
            .next()
            .ok_or_else(|| XaiError::ModelUnavailable("empty batch result".into()))?;
        let target = target.unwrap_or_else(|| argmax(&base));
        let target_probability = target_score(&base, target)? as f32;

        let masks = sample_masks(n, regions, config.inclusion_probability, config.seed);
        let fills: Vec<[u8; 3]> = match config.hide_color {
            HideColor::Value(v) => vec![[v; 3]; regions],
            HideColor::SegmentMean => seg.region_means(image),
        };

        let mut scores: Vec<f64> = Vec::with_capacity(n);
        let batch = config.batch_size.max(1);
        let indices: Vec<usize> = (0..n).collect();
        for chunk in indices.chunks(batch) {
            self.cancel.check("perturbation sampling")?;
            let images: Vec<SpectralImage> = chunk
                .par_iter()
                .map(|&i| perturb(image, &seg, &masks[i * regions..(i + 1) * regions], &fills))
                .collect();
            let probs = predict_batch(&images)?;
            if probs.len() != images.len() {
                return Err(XaiError::ModelUnavailable(format!(
                    "batch of {} images returned {} results",
                    images.len(),
                    probs.len()
                )));
            }
            for p in &probs {
                scores.push(target_score(p, target)?);
            }
        }

        let design = Array2::from_shape_fn((n, regions), |(i, r)| {
            if masks[i * regions + r] { 1.0 } else { 0.0 }
        });
        let width = f64::from(config.kernel_width).max(f64::EPSILON);
        let weights: Vec<f64> = masks
            .chunks(regions)
            .map(|row| {
                let d = cosine_distance_to_ones(row);
                (-(d * d) / (width * width)).exp().sqrt()
            })
            .collect();

        let fit = fit_weighted_ridge(&design, &scores, &weights, f64::from(config.ridge_alpha))?;
        let selected = select_regions(
            &fit.coefficients,
            config.top_k,
            config.positive_only,
            f64::from(config.min_weight),
        );

        let mut sign = vec![0i8; regions];
        for &id in &selected {
            sign[id as usize] = if fit.coefficients[id as usize] < 0.0 { -1 } else { 1 };
        }
        let mask: Vec<i8> = seg.labels().iter().map(|&l| sign[l as usize]).collect();

        log::info!(
            "LIME: {regions} regions, {n} samples, class {target}, R² {:.3}, {} selected in {:.1} ms",
            fit.score,
            selected.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(LocalSurrogateExplanation {
            target_class: target,
            target_probability,
            region_weights: fit.coefficients,
            intercept: fit.intercept,
            score: fit.score,
            local_prediction: fit.local_prediction,
            selected,
            num_samples: n,
            segmentation: seg,
            mask,
        })
    }
}

/// Probability of `target`, rejected when missing or not finite.
fn target_score(probs: &[f32], target: usize) -> Result<f64, XaiError> {
    let p = *probs.get(target).ok_or(XaiError::TargetClassOutOfRange {
        index: target,
        classes: probs.len(),
    })?;
    if !p.is_finite() {
        return Err(XaiError::ModelUnavailable(format!(
            "non-finite score {p} for class {target}"
        )));
    }
    Ok(f64::from(p))
}

/// Row-major `n × regions` inclusion matrix; row 0 keeps every region.
fn sample_masks(n: usize, regions: usize, probability: f64, seed: u64) -> Vec<bool> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut masks = vec![true; n * regions];
    for m in masks.iter_mut().skip(regions) {
        *m = rng.f64() < probability;
    }
    masks
}

fn perturb(
    image: &SpectralImage,
    seg: &Segmentation,
    active: &[bool],
    fills: &[[u8; 3]],
) -> SpectralImage {
    let mut out = image.clone();
    for (px, &l) in out.data_mut().chunks_exact_mut(3).zip(seg.labels()) {
        if !active[l as usize] {
            px.copy_from_slice(&fills[l as usize]);
        }
    }
    out
}

/// 1 − cos(z, 1). A zero vector has similarity 0.
fn cosine_distance_to_ones(row: &[bool]) -> f64 {
    let on = row.iter().filter(|&&b| b).count() as f64;
    if on == 0.0 || row.is_empty() {
        return 1.0;
    }
    1.0 - on / (on.sqrt() * (row.len() as f64).sqrt())
}

/// Region ids ranked by |weight| (ties → lowest id), filtered, truncated.
fn select_regions(weights: &[f64], top_k: usize, positive_only: bool, min_weight: f64) -> Vec<u32> {
    let mut order: Vec<usize> = (0..weights.len())
        .filter(|&i| !positive_only || weights[i] > 0.0)
        .filter(|&i| weights[i].abs() >= min_weight)
        .collect();
    order.sort_by(|&a, &b| weights[b].abs().total_cmp(&weights[a].abs()).then(a.cmp(&b)));
    order.truncate(top_k);
    order.into_iter().map(|i| i as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::config::SegmentationConfig;
    use dx_core::error::ErrorKind;

    const SIZE: u32 = 48;

    /// Dark background with a white square at x, y in 6..18.
    fn scene() -> SpectralImage {
        let mut img = SpectralImage::new(SIZE, SIZE);
        for y in 0..SIZE {
            for x in 0..SIZE {
                let c = if (6..18).contains(&x) && (6..18).contains(&y) {
                    (255, 255, 255)
                } else if x >= SIZE / 2 {
                    (20, 60, 140)
                } else {
                    (60, 20, 20)
                };
                img.set_pixel(x, y, c);
            }
        }
        img
    }

    fn in_square(x: u32, y: u32) -> bool {
        (6..18).contains(&x) && (6..18).contains(&y)
    }

    /// P(fake) grows with the share of white pixels (0.75 on the full scene).
    fn white_detector(img: &SpectralImage) -> Result<Vec<f32>, XaiError> {
        let white = img
            .data()
            .chunks_exact(3)
            .filter(|px| px.iter().all(|&v| v > 200))
            .count() as f32;
        let p = (white / img.pixel_count() as f32 * 12.0).min(1.0);
        Ok(vec![1.0 - p, p])
    }

    /// Short links only, so flat color patches never merge.
    fn config() -> PerturbationConfig {
        PerturbationConfig {
            segmentation: SegmentationConfig {
                max_dist: 10.0,
                ..SegmentationConfig::default()
            },
            ..PerturbationConfig::default()
        }
    }

    fn explainer() -> PerturbationExplainer {
        PerturbationExplainer::new(config())
    }

    #[test]
    fn mask_is_a_subset_of_the_segmentation() {
        let exp = explainer().explain(&scene(), white_detector, 300, 4).unwrap();
        let r = exp.segmentation.num_regions() as u32;
        assert!(exp.selected.len() <= 4);
        assert!(exp.selected.iter().all(|&id| id < r));
        for (i, &m) in exp.mask.iter().enumerate() {
            if m != 0 {
                assert!(exp.selected.contains(&exp.segmentation.labels()[i]));
            }
        }
        assert_eq!(exp.mask.len(), (SIZE * SIZE) as usize);
    }

    #[test]
    fn top_region_covers_the_evidence() {
        let exp = explainer().explain(&scene(), white_detector, 300, 3).unwrap();
        assert_eq!(exp.target_class, 1);
        let top = exp.selected[0];
        assert!(exp.weight(top) > 0.0);
        let seg = &exp.segmentation;
        let inside = (0..SIZE)
            .flat_map(|y| (0..SIZE).map(move |x| (x, y)))
            .filter(|&(x, y)| seg.label(x, y) == top)
            .all(|(x, y)| in_square(x, y));
        assert!(inside, "top region {top} leaks outside the white square");
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let a = explainer().explain(&scene(), white_detector, 120, 5).unwrap();
        let b = explainer().explain(&scene(), white_detector, 120, 5).unwrap();
        assert_eq!(a.region_weights, b.region_weights);
        assert_eq!(a.selected, b.selected);
        assert_eq!(a.mask, b.mask);
    }

    #[test]
    fn top_region_is_stable_across_sample_counts() {
        let small = explainer().explain(&scene(), white_detector, 200, 1).unwrap();
        let large = explainer().explain(&scene(), white_detector, 800, 1).unwrap();
        let seg = &small.segmentation;
        for exp in [&small, &large] {
            let top = exp.selected[0];
            let (x, y) = (0..SIZE)
                .flat_map(|y| (0..SIZE).map(move |x| (x, y)))
                .find(|&(x, y)| seg.label(x, y) == top)
                .unwrap();
            assert!(in_square(x, y));
        }
    }

    #[test]
    fn unregularised_fit_needs_enough_samples() {
        let ols = PerturbationConfig {
            num_samples: 2,
            ridge_alpha: 0.0,
            ..config()
        };
        let err = explainer()
            .explain_with(&scene(), &white_detector, &ols, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);

        // α > 0: the regularised fit still runs
        let ridge = PerturbationConfig {
            num_samples: 2,
            ..config()
        };
        assert!(explainer().explain_with(&scene(), &white_detector, &ridge, None).is_ok());
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        let nan = |_: &SpectralImage| -> Result<Vec<f32>, XaiError> { Ok(vec![f32::NAN, f32::NAN]) };
        let err = explainer().explain(&scene(), nan, 40, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn batched_prediction_matches_per_image() {
        let config = PerturbationConfig {
            num_samples: 60,
            batch_size: 7,
            ..config()
        };
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let batched = |batch: &[SpectralImage]| -> Result<Vec<Vec<f32>>, XaiError> {
            calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            batch.iter().map(white_detector).collect()
        };
        let a = explainer().explain_batched(&scene(), &batched, &config, None).unwrap();
        let b = explainer().explain_with(&scene(), &white_detector, &config, None).unwrap();
        assert_eq!(a.region_weights, b.region_weights);
        assert_eq!(a.selected, b.selected);
        // one call for the unperturbed image, then ceil(60 / 7)
        assert_eq!(calls.into_inner(), 1 + 9);
    }

    #[test]
    fn short_batch_result_is_rejected() {
        let short = |batch: &[SpectralImage]| -> Result<Vec<Vec<f32>>, XaiError> {
            Ok(batch.iter().take(1).map(|_| vec![0.5, 0.5]).collect())
        };
        let config = PerturbationConfig {
            num_samples: 20,
            ..config()
        };
        let err = explainer().explain_batched(&scene(), &short, &config, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn zero_samples_is_insufficient() {
        let err = explainer().explain(&scene(), white_detector, 0, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
    }

    #[test]
    fn explicit_target_out_of_range() {
        let config = PerturbationConfig {
            num_samples: 20,
            ..config()
        };
        let err = explainer()
            .explain_with(&scene(), &white_detector, &config, Some(5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TargetClassOutOfRange);
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancelToken::new();
        token.cancel();
        let err = explainer()
            .with_cancel(token)
            .explain(&scene(), white_detector, 50, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn positive_only_drops_negative_regions() {
        let w = [0.5, -0.9, 0.1, -0.05];
        assert_eq!(select_regions(&w, 3, false, 0.0), vec![1, 0, 2]);
        assert_eq!(select_regions(&w, 3, true, 0.0), vec![0, 2]);
        assert_eq!(select_regions(&w, 10, false, 0.2), vec![1, 0]);
    }

    #[test]
    fn cosine_kernel_edges() {
        assert!(cosine_distance_to_ones(&[true, true, true]).abs() < 1e-12);
        assert!((cosine_distance_to_ones(&[false, false]) - 1.0).abs() < 1e-12);
        let masks = sample_masks(3, 4, 0.5, 1);
        assert!(masks[..4].iter().all(|&b| b));
    }
}
