//! Weight bookkeeping and resampling for particle populations.
//!
//! Weights live in the log domain. Normalization subtracts the maximum
//! before exponentiating so that a population whose likelihoods are all
//! tiny is still resolved correctly; only a population where *every*
//! weight is `-inf` is degenerate.

use rand::Rng;

use crate::common::linalg::{log_sum_exp, normalize_log_weights};
use crate::filter::errors::FilterError;

/// Shift log weights so that they normalize to one, in place.
///
/// # Errors
/// `DegenerateWeights` if every weight is `-inf` or any is NaN.
pub fn normalize_in_place(log_weights: &mut [f64], timestep: usize) -> Result<(), FilterError> {
    let log_sum = log_sum_exp(log_weights);
    if !log_sum.is_finite() || log_weights.iter().any(|w| w.is_nan()) {
        return Err(FilterError::DegenerateWeights { timestep });
    }
    log_weights.iter_mut().for_each(|w| *w -= log_sum);
    Ok(())
}

/// Effective sample size `1 / Σ wᵢ²` of normalized weights
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Effective sample size straight from log weights
pub fn effective_sample_size_log(log_weights: &[f64]) -> f64 {
    normalize_log_weights(log_weights)
        .map(|w| effective_sample_size(&w))
        .unwrap_or(0.0)
}

/// Systematic resampling
///
/// Draws one uniform offset in `[0, 1/count)` and selects `count` ancestor
/// indices at stride `1/count` along the cumulative distribution of the
/// normalized `weights`. The returned indices are non-decreasing.
pub fn systematic_resample<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &[f64],
    count: usize,
) -> Vec<usize> {
    let n = weights.len();
    let mut ancestors = Vec::with_capacity(count);
    if n == 0 || count == 0 {
        return ancestors;
    }

    let step = 1.0 / count as f64;
    let offset: f64 = rng.gen::<f64>() * step;
    let mut i = 0;
    let mut cumsum = weights[0];
    for k in 0..count {
        let u = offset + k as f64 * step;
        while u > cumsum && i + 1 < n {
            i += 1;
            cumsum += weights[i];
        }
        ancestors.push(i);
    }
    ancestors
}

/// Draw a single index with probability proportional to `exp(log_weights)`
///
/// # Errors
/// `DegenerateWeights` (tagged with `timestep`) if no weight is finite.
pub fn sample_log_categorical<R: Rng + ?Sized>(
    rng: &mut R,
    log_weights: &[f64],
    timestep: usize,
) -> Result<usize, FilterError> {
    let weights =
        normalize_log_weights(log_weights).ok_or(FilterError::DegenerateWeights { timestep })?;
    Ok(sample_categorical(rng, &weights))
}

/// Draw a single index from normalized linear weights (inverse CDF)
pub fn sample_categorical<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> usize {
    let u: f64 = rng.gen();
    let mut cumsum = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumsum += w;
        if u < cumsum {
            return i;
        }
    }
    // Rounding can leave the total a hair below one.
    weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or(weights.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::rng::SimpleRng;

    #[test]
    fn test_normalize_in_place() {
        let mut lw = vec![-800.0, -801.0, -802.0];
        normalize_in_place(&mut lw, 0).unwrap();
        let sum: f64 = lw.iter().map(|w| w.exp()).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_degenerate() {
        let mut lw = vec![f64::NEG_INFINITY; 3];
        let err = normalize_in_place(&mut lw, 5).unwrap_err();
        assert!(matches!(err, FilterError::DegenerateWeights { timestep: 5 }));
    }

    #[test]
    fn test_ess_extremes() {
        assert!((effective_sample_size(&[0.25; 4]) - 4.0).abs() < 1e-12);
        assert!((effective_sample_size(&[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
        let lw = vec![(0.5f64).ln(), (0.5f64).ln()];
        assert!((effective_sample_size_log(&lw) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_systematic_preserves_count() {
        let mut rng = SimpleRng::new(42);
        let weights = [0.1, 0.2, 0.3, 0.4];
        for count in [1, 4, 7, 100] {
            let idx = systematic_resample(&mut rng, &weights, count);
            assert_eq!(idx.len(), count);
            assert!(idx.windows(2).all(|w| w[0] <= w[1]));
            assert!(idx.iter().all(|&i| i < weights.len()));
        }
    }

    #[test]
    fn test_systematic_drops_zero_weight() {
        let mut rng = SimpleRng::new(1);
        let weights = [0.0, 0.5, 0.0, 0.5];
        let idx = systematic_resample(&mut rng, &weights, 10);
        assert!(idx.iter().all(|&i| i == 1 || i == 3));
        assert_eq!(idx.iter().filter(|&&i| i == 1).count(), 5);
    }

    #[test]
    fn test_systematic_uniform_is_identity() {
        let mut rng = SimpleRng::new(9);
        let weights = [0.2; 5];
        let idx = systematic_resample(&mut rng, &weights, 5);
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_categorical_frequencies() {
        let mut rng = SimpleRng::new(11);
        let lw = [0.1f64.ln(), 0.6f64.ln(), 0.3f64.ln()];
        let mut counts = [0usize; 3];
        let n = 20000;
        for _ in 0..n {
            counts[sample_log_categorical(&mut rng, &lw, 0).unwrap()] += 1;
        }
        assert!((counts[1] as f64 / n as f64 - 0.6).abs() < 0.02);
        assert!((counts[0] as f64 / n as f64 - 0.1).abs() < 0.02);
    }
}
