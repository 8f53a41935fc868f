//! Kalman step for the conditionally linear-Gaussian substate
//!
//! Each Rao-Blackwellized particle carries its own `(z, P)`. The model
//! supplies the per-particle matrices for the current step; this module
//! applies them:
//! - `z' = A × z + f`
//! - `P' = A × P × Aᵀ + Q`
//!
//! and, when a linear measurement relation is present, the update with
//! innovation `y - (C × z' + h)`. Covariance updates use the Joseph form
//! followed by symmetrization so that long recursions stay symmetric
//! positive semi-definite.

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::{cholesky, log_gaussian_pdf_chol, symmetrize};
use crate::filter::errors::FilterError;

/// Kalman prediction, in place
///
/// `a = None` means identity dynamics, `q = None` means no process noise.
#[inline]
pub fn predict(
    z: &mut DVector<f64>,
    p: &mut DMatrix<f64>,
    a: Option<&DMatrix<f64>>,
    f: Option<&DVector<f64>>,
    q: Option<&DMatrix<f64>>,
) {
    if let Some(a) = a {
        *z = a * &*z;
        *p = a * &*p * a.transpose();
    }
    if let Some(f) = f {
        *z += f;
    }
    if let Some(q) = q {
        *p += q;
    }
    *p = symmetrize(p);
}

/// Outcome of a measurement update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Log-density of the innovation under `S`
    pub log_likelihood: f64,
    /// Innovation `y - (C × z + h)`
    pub innovation: DVector<f64>,
    /// Innovation covariance `S = C × P × Cᵀ + R`
    pub innovation_covariance: DMatrix<f64>,
}

/// Kalman measurement update, in place
///
/// Updates `(z, P)` with observation `y = C × z + h + e`, `e ~ N(0, R)`, and
/// returns the innovation log-likelihood that feeds particle weighting.
///
/// # Errors
/// `NotPositiveDefinite` if the innovation covariance has no Cholesky
/// factor, `DimensionMismatch` if the shapes disagree.
pub fn update(
    z: &mut DVector<f64>,
    p: &mut DMatrix<f64>,
    y: &DVector<f64>,
    c: &DMatrix<f64>,
    h: Option<&DVector<f64>>,
    r: &DMatrix<f64>,
) -> Result<UpdateOutcome, FilterError> {
    if c.ncols() != z.len() || c.nrows() != y.len() || r.nrows() != y.len() {
        return Err(FilterError::DimensionMismatch {
            expected: y.len(),
            actual: c.nrows(),
            context: format!(
                "Kalman update (C is {}x{}, z has {}, R is {}x{})",
                c.nrows(),
                c.ncols(),
                z.len(),
                r.nrows(),
                r.ncols()
            ),
        });
    }

    let mut y_pred = c * &*z;
    if let Some(h) = h {
        y_pred += h;
    }
    let innovation = y - y_pred;

    let s = symmetrize(&(c * &*p * c.transpose() + r));
    let chol = cholesky(&s, "innovation covariance")?;
    let log_likelihood = log_gaussian_pdf_chol(&innovation, &chol);

    // K = P Cᵀ S⁻¹, computed as (S⁻¹ C P)ᵀ since S and P are symmetric
    let k = chol.solve(&(c * &*p)).transpose();

    *z += &k * &innovation;

    let n = z.len();
    let i_minus_kc = DMatrix::identity(n, n) - &k * c;
    let joseph = &i_minus_kc * &*p * i_minus_kc.transpose() + &k * r * k.transpose();
    *p = symmetrize(&joseph);

    Ok(UpdateOutcome {
        log_likelihood,
        innovation,
        innovation_covariance: s,
    })
}

/// Time-invariant linear-Gaussian state-space model
///
/// `x_{t+1} = F x_t + w_t`, `w_t ~ N(0, Q)`;
/// `y_t = H x_t + v_t`, `v_t ~ N(0, R)`; `x_0 ~ N(m0, P0)`.
#[derive(Debug, Clone)]
pub struct LinearGaussianModel {
    /// State transition matrix `F`
    pub f: DMatrix<f64>,
    /// Process noise covariance `Q`
    pub q: DMatrix<f64>,
    /// Observation matrix `H`
    pub h: DMatrix<f64>,
    /// Observation noise covariance `R`
    pub r: DMatrix<f64>,
    /// Initial state mean
    pub m0: DVector<f64>,
    /// Initial state covariance
    pub p0: DMatrix<f64>,
}

/// Filtered moments produced by [`kalman_filter`]
#[derive(Debug, Clone)]
pub struct KalmanFilterResult {
    /// Filtered means, one per observation
    pub means: Vec<DVector<f64>>,
    /// Filtered covariances, one per observation
    pub covariances: Vec<DMatrix<f64>>,
    /// Total log-likelihood of the observed values
    pub log_likelihood: f64,
}

/// Closed-form Kalman filter
///
/// Observation `k` is applied to the prior for step `k` (the first one to
/// `N(m0, P0)` itself), so `means[k]` is `E[x_k | y_0..y_k]`. `None` entries
/// skip the update.
pub fn kalman_filter(
    model: &LinearGaussianModel,
    ys: &[Option<DVector<f64>>],
) -> Result<KalmanFilterResult, FilterError> {
    let mut z = model.m0.clone();
    let mut p = model.p0.clone();
    let mut means = Vec::with_capacity(ys.len());
    let mut covariances = Vec::with_capacity(ys.len());
    let mut log_likelihood = 0.0;

    for (k, y) in ys.iter().enumerate() {
        if k > 0 {
            predict(&mut z, &mut p, Some(&model.f), None, Some(&model.q));
        }
        if let Some(y) = y {
            log_likelihood += update(&mut z, &mut p, y, &model.h, None, &model.r)?.log_likelihood;
        }
        means.push(z.clone());
        covariances.push(p.clone());
    }

    Ok(KalmanFilterResult {
        means,
        covariances,
        log_likelihood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::linalg::log_normal_scalar;

    #[test]
    fn test_predict_scalar() {
        let mut z = DVector::from_vec(vec![2.0]);
        let mut p = DMatrix::from_element(1, 1, 1.0);
        let a = DMatrix::from_element(1, 1, 0.5);
        let f = DVector::from_vec(vec![1.0]);
        let q = DMatrix::from_element(1, 1, 0.25);
        predict(&mut z, &mut p, Some(&a), Some(&f), Some(&q));
        assert!((z[0] - 2.0).abs() < 1e-12);
        assert!((p[(0, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_update_scalar_matches_closed_form() {
        let mut z = DVector::from_vec(vec![0.0]);
        let mut p = DMatrix::from_element(1, 1, 4.0);
        let c = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, 1.0);
        let y = DVector::from_vec(vec![5.0]);

        let out = update(&mut z, &mut p, &y, &c, None, &r).unwrap();

        // K = 4 / 5
        assert!((z[0] - 4.0).abs() < 1e-12);
        assert!((p[(0, 0)] - 0.8).abs() < 1e-12);
        assert!((out.log_likelihood - log_normal_scalar(5.0, 5.0).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_update_with_offset() {
        let mut z = DVector::from_vec(vec![1.0]);
        let mut p = DMatrix::from_element(1, 1, 1.0);
        let c = DMatrix::from_element(1, 1, 2.0);
        let h = DVector::from_vec(vec![3.0]);
        let r = DMatrix::from_element(1, 1, 1.0);
        // Prediction is exactly the observation: mean must not move.
        let y = DVector::from_vec(vec![5.0]);
        update(&mut z, &mut p, &y, &c, Some(&h), &r).unwrap();
        assert!((z[0] - 1.0).abs() < 1e-12);
        assert!((p[(0, 0)] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_update_rejects_bad_noise() {
        let mut z = DVector::from_vec(vec![0.0]);
        let mut p = DMatrix::from_element(1, 1, 0.0);
        let c = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, -1.0);
        let y = DVector::from_vec(vec![1.0]);
        let err = update(&mut z, &mut p, &y, &c, None, &r).unwrap_err();
        assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
    }

    #[test]
    fn test_update_rejects_dimension_mismatch() {
        let mut z = DVector::from_vec(vec![0.0, 0.0]);
        let mut p = DMatrix::identity(2, 2);
        let c = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, 1.0);
        let y = DVector::from_vec(vec![1.0]);
        let err = update(&mut z, &mut p, &y, &c, None, &r).unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut z = DVector::from_vec(vec![0.0, 0.0]);
        let mut p = DMatrix::identity(2, 2);
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let q = DMatrix::from_row_slice(2, 2, &[0.01, 0.002, 0.002, 0.02]);
        let c = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let r = DMatrix::from_element(1, 1, 0.5);
        for k in 0..500 {
            predict(&mut z, &mut p, Some(&a), None, Some(&q));
            let y = DVector::from_vec(vec![(k as f64 * 0.1).sin()]);
            update(&mut z, &mut p, &y, &c, None, &r).unwrap();
        }
        assert_eq!(p, p.transpose());
        assert!(p.clone().cholesky().is_some());
    }

    #[test]
    fn test_kalman_filter_missing_observation() {
        let model = LinearGaussianModel {
            f: DMatrix::identity(1, 1),
            q: DMatrix::from_element(1, 1, 1.0),
            h: DMatrix::identity(1, 1),
            r: DMatrix::from_element(1, 1, 1.0),
            m0: DVector::zeros(1),
            p0: DMatrix::from_element(1, 1, 1.0),
        };
        let ys = vec![Some(DVector::from_vec(vec![1.0])), None];
        let out = kalman_filter(&model, &ys).unwrap();
        assert!((out.means[0][0] - 0.5).abs() < 1e-12);
        // Pure prediction: mean unchanged, variance grows by Q.
        assert!((out.means[1][0] - 0.5).abs() < 1e-12);
        assert!((out.covariances[1][(0, 0)] - 1.5).abs() < 1e-12);
    }
}
