//! First-stage weights for auxiliary particle filtering
//!
//! The predictive likelihood `p(y_{t+1} | x_t^i)` of a mixed model is not
//! available in closed form when the measurement is nonlinear in `ξ`. Both
//! strategies approximate it by a Gaussian around the one-step-ahead
//! prediction of particle `i`:
//!
//! - [`LookAhead::Extended`] linearizes `g(ξ) = h(ξ) + C(ξ) z` with a central
//!   finite-difference Jacobian `J`, giving covariance
//!   `R + C P Cᵀ + J Σ_ξ Jᵀ`.
//! - [`LookAhead::Unscented`] pushes symmetric sigma points of
//!   `N(ξ̂, Σ_ξ)` through `g` and adds `R + C P Cᵀ` at the mean. `Σ_ξ` may
//!   be singular (a noise-free nonlinear state); the sigma points then come
//!   from its eigendecomposition.
//!
//! `Σ_ξ = Q_ξ + A_ξ P A_ξᵀ` is the predictive covariance of `ξ`.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use smallvec::SmallVec;

use super::mixed::{MixedNlGaussian, RbParticle};
use crate::common::constants::FINITE_DIFF_STEP;
use crate::common::linalg::{log_gaussian_pdf, psd_sqrt};
use crate::filter::errors::FilterError;

/// Linearization used for the look-ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LookAhead {
    /// First-order Taylor expansion
    Extended,
    /// Sigma-point transform
    Unscented,
}

/// Sigma-point outputs of one particle; `2d + 1` points fit inline for `d <= 3`
type SigmaOutputs = SmallVec<[DVector<f64>; 7]>;

/// Log first-stage weights of predicted particles
///
/// `predicted[i]` is particle `i` moved to its predicted `ξ̂` with the
/// predicted linear moments, paired with `Σ_ξ`. `t` is the time of `y`.
pub fn first_stage_weights<M: MixedNlGaussian + ?Sized>(
    model: &M,
    strategy: LookAhead,
    predicted: &[(RbParticle, DMatrix<f64>)],
    y: &DVector<f64>,
    t: usize,
) -> Result<Vec<f64>, FilterError> {
    match strategy {
        LookAhead::Extended => extended(model, predicted, y, t),
        LookAhead::Unscented => unscented(model, predicted, y, t),
    }
}

fn extended<M: MixedNlGaussian + ?Sized>(
    model: &M,
    predicted: &[(RbParticle, DMatrix<f64>)],
    y: &DVector<f64>,
    t: usize,
) -> Result<Vec<f64>, FilterError> {
    let d = model.xi_dim();
    let n = predicted.len();
    let stride = 1 + 2 * d;

    // Batch layout per particle: the mean, then (+δ, -δ) for each dimension
    let mut batch = Vec::with_capacity(n * stride);
    let mut steps = Vec::with_capacity(n * d);
    for (p, _) in predicted {
        batch.push(p.clone());
        for k in 0..d {
            let delta = FINITE_DIFF_STEP * p.xi[k].abs().max(1.0);
            steps.push(delta);
            let mut plus = p.clone();
            plus.xi[k] += delta;
            let mut minus = p.clone();
            minus.xi[k] -= delta;
            batch.push(plus);
            batch.push(minus);
        }
    }
    let md = model.get_meas_dynamics(&batch, t)?;
    md.validate(batch.len())?;

    let mut weights = Vec::with_capacity(n);
    for (i, (p, xi_cov)) in predicted.iter().enumerate() {
        let base = i * stride;
        let mean = md.predict(base, &p.z, y.len());
        let mut jacobian = DMatrix::zeros(y.len(), d);
        for k in 0..d {
            let plus = md.predict(base + 1 + 2 * k, &p.z, y.len());
            let minus = md.predict(base + 2 + 2 * k, &p.z, y.len());
            jacobian.set_column(k, &((plus - minus) / (2.0 * steps[i * d + k])));
        }
        let mut cov = md.noise(base)?.clone() + &jacobian * xi_cov * jacobian.transpose();
        if let Some(c) = md.coupling(base) {
            cov += c * &p.p * c.transpose();
        }
        weights.push(log_gaussian_pdf(y, &mean, &cov)?);
    }
    Ok(weights)
}

fn unscented<M: MixedNlGaussian + ?Sized>(
    model: &M,
    predicted: &[(RbParticle, DMatrix<f64>)],
    y: &DVector<f64>,
    t: usize,
) -> Result<Vec<f64>, FilterError> {
    let d = model.xi_dim();
    let n = predicted.len();
    let stride = 1 + 2 * d;
    let kappa = (3.0 - d as f64).max(0.0);
    let spread = (d as f64 + kappa).sqrt();
    let (w0, wi) = if d == 0 {
        (1.0, 0.0)
    } else {
        (
            kappa / (d as f64 + kappa),
            1.0 / (2.0 * (d as f64 + kappa)),
        )
    };

    let mut batch = Vec::with_capacity(n * stride);
    for (p, xi_cov) in predicted {
        batch.push(p.clone());
        if d == 0 {
            continue;
        }
        if xi_cov.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NotPositiveDefinite {
                context: "look-ahead sigma point covariance (non-finite entries)".to_string(),
            });
        }
        // Singular Σ_ξ collapses sigma points along its null space
        let l = psd_sqrt(xi_cov);
        for k in 0..d {
            let offset = l.column(k) * spread;
            let mut plus = p.clone();
            plus.xi += &offset;
            let mut minus = p.clone();
            minus.xi -= &offset;
            batch.push(plus);
            batch.push(minus);
        }
    }
    let md = model.get_meas_dynamics(&batch, t)?;
    md.validate(batch.len())?;

    let mut weights = Vec::with_capacity(n);
    for (i, (p, _)) in predicted.iter().enumerate() {
        let base = i * stride;
        let outputs: SigmaOutputs = (0..stride)
            .map(|j| md.predict(base + j, &p.z, y.len()))
            .collect();
        let mut mean = &outputs[0] * w0;
        for g in outputs.iter().skip(1) {
            mean += g * wi;
        }
        let mut cov = md.noise(base)?.clone();
        if let Some(c) = md.coupling(base) {
            cov += c * &p.p * c.transpose();
        }
        for (j, g) in outputs.iter().enumerate() {
            let w = if j == 0 { w0 } else { wi };
            let diff = g - &mean;
            cov += &diff * diff.transpose() * w;
        }
        weights.push(log_gaussian_pdf(y, &mean, &cov)?);
    }
    Ok(weights)
}
