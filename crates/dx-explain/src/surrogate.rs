use dx_core::error::XaiError;
use ndarray::{Array1, Array2, Axis};

/// Modèle linéaire local ajusté par moindres carrés pondérés (ridge).
#[derive(Clone, Debug, PartialEq)]
pub struct SurrogateFit {
    /// One coefficient per feature.
    pub coefficients: Vec<f64>,
    /// Intercept.
    pub intercept: f64,
    /// Weighted R² on the training samples.
    pub score: f64,
    /// Surrogate output on the first sample.
    pub local_prediction: f64,
}

/// Weighted ridge regression with an unpenalised intercept.
///
/// Minimises `Σ wᵢ (yᵢ − b − xᵢ·β)² + α‖β‖²`. With `alpha == 0` this is
/// weighted least squares and needs at least `features + 1` samples.
///
/// # Errors
/// `XaiError::InsufficientSamples` when there are no samples, when `alpha == 0`
/// and samples ≤ features, or when the normal equations are singular.
///
/// # Example
/// ```
/// use dx_explain::surrogate::fit_weighted_ridge;
/// use ndarray::array;
/// let x = array![[0.0], [1.0], [2.0], [3.0]];
/// let y = [1.0, 3.0, 5.0, 7.0];
/// let fit = fit_weighted_ridge(&x, &y, &[1.0; 4], 0.0).unwrap();
/// assert!((fit.coefficients[0] - 2.0).abs() < 1e-9);
/// assert!((fit.intercept - 1.0).abs() < 1e-9);
/// assert!((fit.score - 1.0).abs() < 1e-9);
/// ```
pub fn fit_weighted_ridge(
    x: &Array2<f64>,
    y: &[f64],
    weights: &[f64],
    alpha: f64,
) -> Result<SurrogateFit, XaiError> {
    let (n, p) = x.dim();
    let insufficient = || XaiError::InsufficientSamples {
        samples: n,
        regions: p,
    };
    if n == 0 || y.len() != n || weights.len() != n {
        return Err(insufficient());
    }
    if alpha <= 0.0 && n < p + 1 {
        return Err(insufficient());
    }
    let w = Array1::from(weights.to_vec());
    let y = Array1::from(y.to_vec());
    let w_sum = w.sum();
    if w_sum <= 0.0 || !w_sum.is_finite() {
        return Err(insufficient());
    }

    // weighted centring removes the intercept from the penalised system
    let x_mean = x.t().dot(&w) / w_sum;
    let y_mean = w.dot(&y) / w_sum;
    let xc = x - &x_mean.view().insert_axis(Axis(0));
    let yc = &y - y_mean;
    let wxc = &xc * &w.view().insert_axis(Axis(1));

    let mut gram = xc.t().dot(&wxc);
    for i in 0..p {
        gram[[i, i]] += alpha.max(0.0);
    }
    let rhs = wxc.t().dot(&yc);
    let beta = cholesky_solve(&gram, &rhs).ok_or_else(insufficient)?;
    let intercept = y_mean - x_mean.dot(&beta);

    let pred = x.dot(&beta) + intercept;
    let ss_res: f64 = (&y - &pred).mapv(|r| r * r).dot(&w);
    let ss_tot: f64 = yc.mapv(|r| r * r).dot(&w);
    let score = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    Ok(SurrogateFit {
        local_prediction: pred[0],
        coefficients: beta.to_vec(),
        intercept,
        score,
    })
}

/// Solve `A z = b` for symmetric positive definite `A`. `None` if `A` is not.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let scale = (0..n).map(|i| a[[i, i]].abs()).fold(0.0f64, f64::max).max(1.0);
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut d = a[[j, j]];
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        if d <= scale * 1e-12 || !d.is_finite() {
            return None;
        }
        let d = d.sqrt();
        l[[j, j]] = d;
        for i in j + 1..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / d;
        }
    }
    // L u = b, then Lᵀ z = u
    let mut u = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * u[k];
        }
        u[i] = s / l[[i, i]];
    }
    let mut z = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = u[i];
        for k in i + 1..n {
            s -= l[[k, i]] * z[k];
        }
        z[i] = s / l[[i, i]];
    }
    Some(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::error::ErrorKind;
    use ndarray::array;

    #[test]
    fn recovers_planted_coefficients() {
        let mut rng = fastrand::Rng::with_seed(1);
        let n = 200;
        let x = Array2::from_shape_fn((n, 3), |_| f64::from(u8::from(rng.bool())));
        let y: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|r| 0.5 + 2.0 * r[0] - 1.0 * r[1] + 0.0 * r[2])
            .collect();
        let w: Vec<f64> = (0..n).map(|_| 0.5 + rng.f64()).collect();
        let fit = fit_weighted_ridge(&x, &y, &w, 0.0).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-8);
        assert!((fit.coefficients[1] + 1.0).abs() < 1e-8);
        assert!(fit.coefficients[2].abs() < 1e-8);
        assert!((fit.intercept - 0.5).abs() < 1e-8);
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let x = array![[0.0], [1.0], [0.0], [1.0]];
        let y = [0.0, 1.0, 0.0, 1.0];
        let ols = fit_weighted_ridge(&x, &y, &[1.0; 4], 0.0).unwrap();
        let ridge = fit_weighted_ridge(&x, &y, &[1.0; 4], 1.0).unwrap();
        assert!(ridge.coefficients[0] < ols.coefficients[0]);
        assert!(ridge.coefficients[0] > 0.0);
    }

    #[test]
    fn ols_needs_more_samples_than_features() {
        let x = Array2::<f64>::ones((3, 5));
        let err = fit_weighted_ridge(&x, &[1.0; 3], &[1.0; 3], 0.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
        // regularised fallback is fine
        assert!(fit_weighted_ridge(&x, &[1.0; 3], &[1.0; 3], 1.0).is_ok());
    }

    #[test]
    fn no_samples_is_insufficient() {
        let x = Array2::<f64>::zeros((0, 4));
        let err = fit_weighted_ridge(&x, &[], &[], 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
    }

    #[test]
    fn singular_ols_is_insufficient() {
        // duplicated column
        let x = array![[1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let err = fit_weighted_ridge(&x, &[1.0, 0.0, 1.0, 0.0], &[1.0; 4], 0.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
    }
}
