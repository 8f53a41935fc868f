//! Linear algebra utilities
//!
//! Gaussian log-densities, multivariate normal sampling, log-domain weight
//! arithmetic and covariance hygiene. Every routine that needs a Cholesky
//! factor reports a non-positive-definite covariance as an error: such a
//! matrix can only come from a broken model definition.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::common::constants::SYMMETRY_TOLERANCE;
use crate::filter::errors::FilterError;

/// Cholesky factor of a covariance, or an error naming the offending matrix
pub fn cholesky(
    sigma: &DMatrix<f64>,
    context: &str,
) -> Result<nalgebra::Cholesky<f64, nalgebra::Dyn>, FilterError> {
    if sigma.nrows() != sigma.ncols() {
        return Err(FilterError::DimensionMismatch {
            expected: sigma.nrows(),
            actual: sigma.ncols(),
            context: format!("{} (non-square covariance)", context),
        });
    }
    if sigma.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::NotPositiveDefinite {
            context: format!("{} (non-finite entries)", context),
        });
    }
    // The factorization reads only the lower triangle
    let scale = sigma.amax().max(1.0);
    if (sigma - sigma.transpose()).amax() > SYMMETRY_TOLERANCE * scale {
        return Err(FilterError::NotPositiveDefinite {
            context: format!("{} (asymmetric)", context),
        });
    }
    sigma
        .clone()
        .cholesky()
        .ok_or_else(|| FilterError::NotPositiveDefinite {
            context: context.to_string(),
        })
}

/// Log-density of `N(x; mu, sigma)`
///
/// # Errors
/// `NotPositiveDefinite` if `sigma` has no Cholesky factor, and
/// `DimensionMismatch` if the shapes disagree.
pub fn log_gaussian_pdf(
    x: &DVector<f64>,
    mu: &DVector<f64>,
    sigma: &DMatrix<f64>,
) -> Result<f64, FilterError> {
    if x.len() != mu.len() || sigma.nrows() != x.len() {
        return Err(FilterError::DimensionMismatch {
            expected: x.len(),
            actual: sigma.nrows().max(mu.len()),
            context: "Gaussian density".to_string(),
        });
    }
    if x.is_empty() {
        return Ok(0.0);
    }
    let chol = cholesky(sigma, "Gaussian density covariance")?;
    let diff = x - mu;
    Ok(log_gaussian_pdf_chol(&diff, &chol))
}

/// Log-density of a zero-mean Gaussian evaluated at `diff`, given the
/// Cholesky factor of its covariance.
pub fn log_gaussian_pdf_chol(
    diff: &DVector<f64>,
    chol: &nalgebra::Cholesky<f64, nalgebra::Dyn>,
) -> f64 {
    let n = diff.len() as f64;
    let l = chol.l_dirty();
    let log_det: f64 = 2.0 * (0..diff.len()).map(|i| l[(i, i)].ln()).sum::<f64>();
    let solved = chol.solve(diff);
    let mahalanobis = diff.dot(&solved);
    -0.5 * (n * (2.0 * PI).ln() + log_det + mahalanobis)
}

/// Log-density of a scalar Gaussian `N(diff; 0, var)`
///
/// # Errors
/// `NotPositiveDefinite` unless `var` is finite and positive.
#[inline]
pub fn log_normal_scalar(diff: f64, var: f64) -> Result<f64, FilterError> {
    if !(var > 0.0 && var.is_finite()) {
        return Err(FilterError::NotPositiveDefinite {
            context: format!("scalar variance {}", var),
        });
    }
    Ok(-0.5 * ((2.0 * PI * var).ln() + diff * diff / var))
}

/// Peak of the log-density of `N(0, sigma)`, i.e. its value at the mean
///
/// This is the tightest bound on the density that does not depend on the
/// evaluation point.
pub fn log_gaussian_peak(sigma: &DMatrix<f64>) -> Result<f64, FilterError> {
    if sigma.nrows() == 0 {
        return Ok(0.0);
    }
    let chol = cholesky(sigma, "density bound covariance")?;
    let l = chol.l_dirty();
    let log_det: f64 = 2.0 * (0..sigma.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>();
    Ok(-0.5 * (sigma.nrows() as f64 * (2.0 * PI).ln() + log_det))
}

/// Draw from `N(mean, sigma)`
///
/// A zero-dimensional mean returns an empty vector without touching the
/// generator.
pub fn sample_gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    mean: &DVector<f64>,
    sigma: &DMatrix<f64>,
) -> Result<DVector<f64>, FilterError> {
    if mean.is_empty() {
        return Ok(DVector::zeros(0));
    }
    let chol = cholesky(sigma, "sampling covariance")?;
    let std = DVector::from_fn(mean.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
    Ok(mean + chol.l() * std)
}

/// Draw from `N(mean, sigma)` where `sigma` may be singular
///
/// Used for covariances that legitimately collapse to zero (for instance a
/// linear state observed without noise). Falls back to a symmetric
/// eigendecomposition with negative eigenvalues clamped to zero.
pub fn sample_gaussian_psd<R: Rng + ?Sized>(
    rng: &mut R,
    mean: &DVector<f64>,
    sigma: &DMatrix<f64>,
) -> DVector<f64> {
    if mean.is_empty() {
        return DVector::zeros(0);
    }
    let root = psd_sqrt(sigma);
    let std = DVector::from_fn(mean.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
    mean + root * std
}

/// Square root `L` with `L Lᵀ = sigma` for a positive semi-definite `sigma`
///
/// The Cholesky factor when it exists, otherwise `V √Λ` from a symmetric
/// eigendecomposition with negative eigenvalues clamped to zero.
pub fn psd_sqrt(sigma: &DMatrix<f64>) -> DMatrix<f64> {
    if let Some(chol) = sigma.clone().cholesky() {
        return chol.l();
    }
    let eig = symmetrize(sigma).symmetric_eigen();
    let root = eig.eigenvalues.map(|v| v.max(0.0).sqrt());
    eig.eigenvectors * DMatrix::from_diagonal(&root)
}

/// Compute log-sum-exp for numerical stability
///
/// Computes `log(sum(exp(x)))` by subtracting the maximum first.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }

    let sum: f64 = values.iter().map(|v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Normalize log weights
///
/// Converts log weights to linear weights summing to one. Returns `None`
/// when every weight is `-inf` (or any is NaN), in which case no
/// normalization exists.
pub fn normalize_log_weights(log_weights: &[f64]) -> Option<Vec<f64>> {
    let log_sum = log_sum_exp(log_weights);
    if !log_sum.is_finite() || log_weights.iter().any(|w| w.is_nan()) {
        return None;
    }
    Some(log_weights.iter().map(|w| (w - log_sum).exp()).collect())
}

/// Make matrix symmetric
///
/// Averages a matrix with its transpose, removing the floating-point
/// asymmetry that accumulates over long covariance recursions.
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Stack two vectors vertically
pub fn vstack(top: &DVector<f64>, bottom: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(top.len() + bottom.len());
    out.rows_mut(0, top.len()).copy_from(top);
    out.rows_mut(top.len(), bottom.len()).copy_from(bottom);
    out
}

/// Block-diagonal matrix `diag(a, b)`
pub fn block_diag(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let n = a.nrows() + b.nrows();
    let m = a.ncols() + b.ncols();
    let mut out = DMatrix::zeros(n, m);
    out.view_mut((0, 0), (a.nrows(), a.ncols())).copy_from(a);
    out.view_mut((a.nrows(), a.ncols()), (b.nrows(), b.ncols()))
        .copy_from(b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::rng::SimpleRng;

    #[test]
    fn test_log_gaussian_pdf_matches_scalar() {
        let x = DVector::from_vec(vec![0.3]);
        let mu = DVector::from_vec(vec![-0.2]);
        let sigma = DMatrix::from_element(1, 1, 2.0);
        let lp = log_gaussian_pdf(&x, &mu, &sigma).unwrap();
        assert!((lp - log_normal_scalar(0.5, 2.0).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_log_gaussian_pdf_rejects_indefinite() {
        let x = DVector::from_vec(vec![0.0, 0.0]);
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let err = log_gaussian_pdf(&x, &x, &sigma).unwrap_err();
        assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
    }

    #[test]
    fn test_scalar_density_rejects_bad_variance() {
        for var in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = log_normal_scalar(0.1, var).unwrap_err();
            assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
        }
        assert!(log_normal_scalar(0.0, 1e-12).unwrap().is_finite());
    }

    #[test]
    fn test_psd_sqrt_of_singular_matrix() {
        // Rank one: [1 1; 1 1]
        let sigma = DMatrix::from_element(2, 2, 1.0);
        assert!(sigma.clone().cholesky().is_none());
        let root = psd_sqrt(&sigma);
        assert!((&root * root.transpose() - &sigma).amax() < 1e-12);

        let full = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 0.5]);
        let root = psd_sqrt(&full);
        assert!((&root * root.transpose() - &full).amax() < 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_asymmetric() {
        let lopsided = DMatrix::from_row_slice(2, 2, &[2.0, 5.0, 0.1, 2.0]);
        let err = cholesky(&lopsided, "lopsided").unwrap_err();
        assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
        assert!(err.to_string().contains("asymmetric"));

        // Rounding-level asymmetry is accepted
        let nearly = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5 + 1e-14, 2.0]);
        assert!(cholesky(&nearly, "nearly").is_ok());
    }

    #[test]
    fn test_peak_bounds_density() {
        let sigma = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 0.5]);
        let peak = log_gaussian_peak(&sigma).unwrap();
        let mu = DVector::zeros(2);
        for x in [[0.0, 0.0], [0.1, -0.4], [3.0, 1.0]] {
            let lp = log_gaussian_pdf(&DVector::from_row_slice(&x), &mu, &sigma).unwrap();
            assert!(lp <= peak + 1e-12);
        }
    }

    #[test]
    fn test_log_sum_exp_stable() {
        let values = [1000.0, 1000.0];
        assert!((log_sum_exp(&values) - (1000.0 + 2f64.ln())).abs() < 1e-10);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normalize_log_weights() {
        let w = normalize_log_weights(&[-1e4, -1e4 + 1.0, -1e4 + 2.0]).unwrap();
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(w[2] > w[1] && w[1] > w[0]);

        assert!(normalize_log_weights(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).is_none());
    }

    #[test]
    fn test_sample_gaussian_moments() {
        let mut rng = SimpleRng::new(7);
        let mean = DVector::from_vec(vec![1.0, -2.0]);
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
        let n = 20000;
        let mut acc = DVector::zeros(2);
        for _ in 0..n {
            acc += sample_gaussian(&mut rng, &mean, &sigma).unwrap();
        }
        acc /= n as f64;
        assert!((acc[0] - 1.0).abs() < 0.05);
        assert!((acc[1] + 2.0).abs() < 0.05);
    }

    #[test]
    fn test_sample_gaussian_psd_handles_singular() {
        let mut rng = SimpleRng::new(3);
        let mean = DVector::from_vec(vec![1.0, 1.0]);
        let sigma = DMatrix::zeros(2, 2);
        let x = sample_gaussian_psd(&mut rng, &mean, &sigma);
        assert!((x - mean).norm() < 1e-12);
    }

    #[test]
    fn test_block_helpers() {
        let a = DMatrix::from_element(1, 1, 2.0);
        let b = DMatrix::identity(2, 2);
        let d = block_diag(&a, &b);
        assert_eq!(d.shape(), (3, 3));
        assert_eq!(d[(0, 0)], 2.0);
        assert_eq!(d[(0, 1)], 0.0);
        assert_eq!(d[(2, 2)], 1.0);

        let v = vstack(&DVector::from_vec(vec![1.0]), &DVector::from_vec(vec![2.0, 3.0]));
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
