//! Weighted particle population for one time step.

use crate::common::linalg::normalize_log_weights;
use crate::components::resampling::{effective_sample_size, normalize_in_place};
use crate::filter::errors::FilterError;

/// Weighted particles at one time step
///
/// `particles`, `log_weights` and `ancestors` always have the same length.
/// Log weights are kept normalized (their exponentials sum to one) so every
/// read sees a proper distribution. `ancestors[i]` is the index of particle
/// `i`'s parent in the previous cloud; the initial cloud maps every
/// particle to itself.
#[derive(Debug, Clone)]
pub struct ParticleCloud<P> {
    /// Time index of this step
    pub t: usize,
    /// Particles (index = particle identity for this step)
    pub particles: Vec<P>,
    /// Normalized log weights
    pub log_weights: Vec<f64>,
    /// Parent index of each particle in the previous cloud
    pub ancestors: Vec<usize>,
    /// Whether the parents were chosen by resampling
    pub resampled: bool,
}

impl<P> ParticleCloud<P> {
    /// Create a cloud, normalizing the given log weights.
    ///
    /// # Errors
    /// `DimensionMismatch` if the three sequences differ in length,
    /// `DegenerateWeights` if no weight is finite.
    pub fn new(
        t: usize,
        particles: Vec<P>,
        mut log_weights: Vec<f64>,
        ancestors: Vec<usize>,
        resampled: bool,
    ) -> Result<Self, FilterError> {
        if particles.len() != log_weights.len() || particles.len() != ancestors.len() {
            return Err(FilterError::DimensionMismatch {
                expected: particles.len(),
                actual: if particles.len() != log_weights.len() {
                    log_weights.len()
                } else {
                    ancestors.len()
                },
                context: "particle cloud sequences".to_string(),
            });
        }
        normalize_in_place(&mut log_weights, t)?;
        Ok(Self {
            t,
            particles,
            log_weights,
            ancestors,
            resampled,
        })
    }

    /// Uniformly weighted cloud with identity ancestry
    pub fn uniform(t: usize, particles: Vec<P>) -> Self {
        let n = particles.len();
        let lw = -(n.max(1) as f64).ln();
        Self {
            t,
            log_weights: vec![lw; n],
            ancestors: (0..n).collect(),
            particles,
            resampled: false,
        }
    }

    /// Number of particles
    #[inline]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if the cloud holds no particles
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Linear weights summing to one
    pub fn weights(&self) -> Vec<f64> {
        normalize_log_weights(&self.log_weights)
            .unwrap_or_else(|| vec![1.0 / self.len().max(1) as f64; self.len()])
    }

    /// Effective sample size `1 / Σ wᵢ²`
    pub fn ess(&self) -> f64 {
        effective_sample_size(&self.weights())
    }

    /// Weighted mean of a scalar feature of the particles
    pub fn weighted_mean<F>(&self, f: F) -> f64
    where
        F: Fn(&P) -> f64,
    {
        self.weights()
            .iter()
            .zip(self.particles.iter())
            .map(|(w, p)| w * f(p))
            .sum()
    }

    /// Index of the particle with the highest weight
    pub fn max_weight_index(&self) -> usize {
        self.log_weights
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &w)| {
                if w > best.1 {
                    (i, w)
                } else {
                    best
                }
            })
            .0
    }
}
