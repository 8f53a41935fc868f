//! Model capability traits
//!
//! A model advertises what it can do by the traits it implements:
//!
//! - [`ParticleFiltering`] - the base contract: prior, propagation, measurement
//! - [`Smoothing`] - transition densities for backward simulation
//! - [`ParameterEstimation`] - parameter hooks for PSAEM
//!
//! Rao-Blackwellized models implement
//! [`MixedNlGaussian`](super::mixed::MixedNlGaussian) instead and are turned
//! into a [`ParticleFiltering`] + [`Smoothing`] model by
//! [`RaoBlackwellized`](super::mixed::RaoBlackwellized).
//!
//! Every batch operation works on all `N` particles of a step at once.

use nalgebra::DVector;
use rand::Rng;

use crate::filter::errors::FilterError;
use crate::paramest::accumulator::SufficientStatisticAccumulator;
use crate::paramest::numeric::{maximize_numeric, MStepOutcome};
use crate::types::{Observations, SmoothedTrajectory};

/// `Send + Sync` when the `rayon` feature is enabled, nothing otherwise
#[cfg(feature = "rayon")]
pub trait MaybeSync: Send + Sync {}
#[cfg(feature = "rayon")]
impl<T: Send + Sync + ?Sized> MaybeSync for T {}

/// `Send + Sync` when the `rayon` feature is enabled, nothing otherwise
#[cfg(not(feature = "rayon"))]
pub trait MaybeSync {}
#[cfg(not(feature = "rayon"))]
impl<T: ?Sized> MaybeSync for T {}

/// Base contract of a state-space model driven by a particle filter
pub trait ParticleFiltering {
    /// Per-particle state
    type Particle: Clone + std::fmt::Debug + MaybeSync;
    /// Per-particle process noise draw
    type Noise;
    /// Control input
    type Input: MaybeSync;
    /// Observation
    type Measurement: MaybeSync;

    /// Draw `n` particles from the prior
    fn create_initial_estimate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
    ) -> Result<Vec<Self::Particle>, FilterError>;

    /// One independent process noise draw per particle
    fn sample_process_noise<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        particles: &[Self::Particle],
        u: Option<&Self::Input>,
        t: usize,
    ) -> Result<Vec<Self::Noise>, FilterError>;

    /// Deterministic propagation from step `t` to `t + 1` given the noise
    fn update(
        &self,
        particles: &mut [Self::Particle],
        u: Option<&Self::Input>,
        noise: &[Self::Noise],
        t: usize,
    ) -> Result<(), FilterError>;

    /// Per-particle log-likelihood of `y`
    ///
    /// Rao-Blackwellized models also condition their linear substate on `y`
    /// here, hence `&mut`. A missing observation must give `0.0` for every
    /// particle.
    fn measure(
        &self,
        particles: &mut [Self::Particle],
        y: Option<&Self::Measurement>,
        t: usize,
    ) -> Result<Vec<f64>, FilterError>;

    /// Sample noise, then propagate
    fn propagate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        particles: &mut [Self::Particle],
        u: Option<&Self::Input>,
        t: usize,
    ) -> Result<(), FilterError> {
        let noise = self.sample_process_noise(rng, particles, u, t)?;
        self.update(particles, u, &noise, t)
    }

    /// First-stage weights of the auxiliary particle filter
    ///
    /// Log of an approximation of `p(y_{t+1} | x_t^i)` for every particle.
    /// Models without a look-ahead return `None`; models with one return
    /// `Some` for every call, including an empty batch, which is how the
    /// filter checks the capability before it starts.
    fn eval_first_stage_weights(
        &self,
        _particles: &[Self::Particle],
        _u: Option<&Self::Input>,
        _y: Option<&Self::Measurement>,
        _t: usize,
    ) -> Result<Option<Vec<f64>>, FilterError> {
        Ok(None)
    }

    /// Particle placed in the reference slot of the conditional filter
    ///
    /// Called once the reference's ancestor at step `t` has been chosen.
    /// The default keeps the reference as it is; models carrying sufficient
    /// statistics in the particle recompute them from the ancestor.
    fn conditional_particle(
        &self,
        _ancestor: &Self::Particle,
        reference: &Self::Particle,
        _u: Option<&Self::Input>,
        _t: usize,
    ) -> Result<Self::Particle, FilterError> {
        Ok(reference.clone())
    }
}

/// Transition densities for backward simulation and ancestor sampling
pub trait Smoothing: ParticleFiltering {
    /// `log p(next | particles[i])` for every particle at step `t`
    fn logp_xnext(
        &self,
        particles: &[Self::Particle],
        next: &Self::Particle,
        u: Option<&Self::Input>,
        t: usize,
    ) -> Result<Vec<f64>, FilterError>;

    /// Upper bound on `logp_xnext(particles, next, u, t)` over all `next`
    ///
    /// `None` means no bound is known; rejection sampling then always uses
    /// the exact weighted draw.
    fn logp_xnext_max(
        &self,
        _particles: &[Self::Particle],
        _u: Option<&Self::Input>,
        _t: usize,
    ) -> Result<Option<f64>, FilterError> {
        Ok(None)
    }

    /// Re-draw parts of a particle once its future is fixed
    ///
    /// `future` is the already smoothed particle at step `t + 1` (`None` at
    /// the final step). The default returns the particle unchanged.
    fn sample_smooth<R: Rng + ?Sized>(
        &self,
        _rng: &mut R,
        particle: &Self::Particle,
        _future: Option<&Self::Particle>,
        _u: Option<&Self::Input>,
        _t: usize,
    ) -> Result<Self::Particle, FilterError> {
        Ok(particle.clone())
    }
}

/// Parameter hooks for PSAEM
///
/// Parameters are an opaque vector; the engine never looks inside it. The
/// full-trajectory terms average over the `M` draws of an ensemble.
pub trait ParameterEstimation: Smoothing {
    /// Replace the model parameters
    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), FilterError>;

    /// Current parameters
    fn params(&self) -> DVector<f64>;

    /// `(lower, upper)` bound of every parameter, `None` = unbounded
    fn param_bounds(&self) -> Vec<(Option<f64>, Option<f64>)>;

    /// Mean over the draws of `log p(x_0)`
    fn eval_logp_x0(&self, particles: &[Self::Particle], t: usize) -> Result<f64, FilterError>;

    /// Mean over the draws of `Σ_t log p(x_{t+1} | x_t)`
    fn eval_logp_xnext_fulltraj(
        &self,
        trajectory: &SmoothedTrajectory<Self::Particle>,
        obs: &Observations<Self::Input, Self::Measurement>,
    ) -> Result<f64, FilterError> {
        let m = trajectory.ancestor_count();
        if m == 0 {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for k in 0..trajectory.len().saturating_sub(1) {
            let current = trajectory.at(k);
            let next = trajectory.at(k + 1);
            for j in 0..m {
                let lp = self.logp_xnext(&current[j..=j], &next[j], obs.u(k), obs.t(k))?;
                total += lp[0];
            }
        }
        Ok(total / m as f64)
    }

    /// Mean over the draws of `Σ_t log p(y_t | x_t)`
    fn eval_logp_y_fulltraj(
        &self,
        trajectory: &SmoothedTrajectory<Self::Particle>,
        obs: &Observations<Self::Input, Self::Measurement>,
    ) -> Result<f64, FilterError> {
        let m = trajectory.ancestor_count();
        if m == 0 {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for k in 0..trajectory.len() {
            let mut particles = trajectory.at(k).to_vec();
            total += self
                .measure(&mut particles, obs.y(k), obs.t(k))?
                .iter()
                .sum::<f64>();
        }
        Ok(total / m as f64)
    }

    /// Closed-form M-step, when the model has one
    fn maximize_weighted_analytic(
        &self,
        _stats: &SufficientStatisticAccumulator<Self::Particle>,
        _obs: &Observations<Self::Input, Self::Measurement>,
    ) -> Result<Option<DVector<f64>>, FilterError> {
        Ok(None)
    }

    /// M-step: maximize the weighted expected complete-data log-likelihood
    ///
    /// Uses [`maximize_weighted_analytic`](Self::maximize_weighted_analytic)
    /// when available, otherwise a bounded numeric search capped at
    /// `max_iter` iterations. Leaves the model at the new parameters.
    fn maximize_weighted(
        &mut self,
        stats: &SufficientStatisticAccumulator<Self::Particle>,
        obs: &Observations<Self::Input, Self::Measurement>,
        max_iter: u64,
    ) -> Result<MStepOutcome, FilterError>
    where
        Self: Sized,
    {
        if let Some(params) = self.maximize_weighted_analytic(stats, obs)? {
            self.set_params(&params)?;
            let q_value = stats.expected_log_likelihood(self, obs)?;
            return Ok(MStepOutcome {
                params,
                q_value,
                converged: true,
                iterations: 0,
            });
        }
        maximize_numeric(self, stats, obs, max_iter)
    }
}
