//! Shared helpers for the integration tests
//!
//! Tolerance assertions plus closed-form references for the scalar random
//! walk model.

#![allow(dead_code)]

use nalgebra::DVector;

//=============================================================================
// Assertions
//=============================================================================

/// Assert two scalars agree within `tolerance`
pub fn assert_scalar_close(actual: f64, expected: f64, tolerance: f64, context: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{}: expected {}, got {} (tolerance {})",
        context,
        expected,
        actual,
        tolerance
    );
}

/// Assert two series agree elementwise within `tolerance`
pub fn assert_series_close(actual: &[f64], expected: &[f64], tolerance: f64, context: &str) {
    assert_eq!(actual.len(), expected.len(), "{}: length mismatch", context);
    for (k, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_scalar_close(*a, *e, tolerance, &format!("{} at step {}", context, k));
    }
}

/// Root mean square difference of two series
pub fn rmse(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (sum / a.len().max(1) as f64).sqrt()
}

/// Assert that every log-weight vector of a run is normalized
pub fn assert_normalized(log_weights: &[f64], context: &str) {
    let total: f64 = log_weights.iter().map(|w| w.exp()).sum();
    assert_scalar_close(total, 1.0, 1e-9, context);
}

//=============================================================================
// Closed-form references for x' = x + w, y = x + e
//=============================================================================

/// Filtered and smoothed moments of the scalar random walk
pub struct RandomWalkReference {
    pub filtered_mean: Vec<f64>,
    pub filtered_var: Vec<f64>,
    pub smoothed_mean: Vec<f64>,
    pub smoothed_var: Vec<f64>,
}

/// Kalman filter followed by a Rauch-Tung-Striebel pass
pub fn random_walk_reference(ys: &[Option<f64>], q: f64, r: f64, p0: f64) -> RandomWalkReference {
    let n = ys.len();
    let mut filtered_mean = Vec::with_capacity(n);
    let mut filtered_var = Vec::with_capacity(n);
    let (mut m, mut p) = (0.0, p0);
    for (k, y) in ys.iter().enumerate() {
        if k > 0 {
            p += q;
        }
        if let Some(y) = y {
            let gain = p / (p + r);
            m += gain * (y - m);
            p *= 1.0 - gain;
        }
        filtered_mean.push(m);
        filtered_var.push(p);
    }

    let mut smoothed_mean = filtered_mean.clone();
    let mut smoothed_var = filtered_var.clone();
    for k in (0..n.saturating_sub(1)).rev() {
        let predicted = filtered_var[k] + q;
        let g = filtered_var[k] / predicted;
        smoothed_mean[k] = filtered_mean[k] + g * (smoothed_mean[k + 1] - filtered_mean[k]);
        smoothed_var[k] = filtered_var[k] + g * g * (smoothed_var[k + 1] - predicted);
    }

    RandomWalkReference {
        filtered_mean,
        filtered_var,
        smoothed_mean,
        smoothed_var,
    }
}

/// Wrap scalar observations as vectors
pub fn as_vectors(ys: &[Option<f64>]) -> Vec<Option<DVector<f64>>> {
    ys.iter()
        .map(|y| y.map(|v| DVector::from_element(1, v)))
        .collect()
}
