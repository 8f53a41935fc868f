//! Forward particle filter
//!
//! One driver for the three forward variants:
//!
//! - **PF**: resample systematically when `ESS < threshold * N`, propagate,
//!   weight by the measurement likelihood.
//! - **APF**: resample every step on `w_i * p̂(y_{t+1} | x_i)` (first-stage
//!   weights), propagate, weight by `p(y | x) / p̂(y | x_parent)`.
//! - **CPF-AS**: the last slot holds a fixed reference trajectory. The other
//!   `N - 1` slots are resampled every step; the reference slot's ancestor
//!   is redrawn with probability `∝ w_i * p(x_ref | x_i)`.
//!
//! Weights are kept in the log domain and normalized after every step, and
//! each cloud records its parent indices for the smoothers.

use rand::Rng;

use crate::components::resampling::{sample_log_categorical, systematic_resample};
use crate::model::traits::{ParticleFiltering, Smoothing};
use crate::reporter::{EstimationReporter, StepSummary};
use crate::types::{FilterConfig, FilterMode, Observations, ParticleCloud, Trajectory};

use super::errors::FilterError;

type LogpFn<'a, M> = dyn Fn(
        &[<M as ParticleFiltering>::Particle],
        &<M as ParticleFiltering>::Particle,
        Option<&<M as ParticleFiltering>::Input>,
        usize,
    ) -> Result<Vec<f64>, FilterError>
    + 'a;

/// Reference trajectory and the transition density used to redraw its
/// ancestors
struct Conditioning<'a, M: ParticleFiltering> {
    reference: &'a [M::Particle],
    logp_xnext: &'a LogpFn<'a, M>,
}

/// Forward filter over a fixed observation sequence
#[derive(Debug, Clone)]
pub struct ForwardFilter<'m, M> {
    model: &'m M,
    particle_count: usize,
    resample_threshold: f64,
    mode: FilterMode,
}

impl<'m, M: ParticleFiltering> ForwardFilter<'m, M> {
    /// Create a filter, checking the configuration and the model's
    /// capabilities for the chosen mode.
    ///
    /// # Errors
    /// `Configuration` for invalid settings, `MissingCapability` if APF is
    /// requested from a model without first-stage weights.
    pub fn new(model: &'m M, config: &FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        if config.filter_mode == FilterMode::Auxiliary
            && model.eval_first_stage_weights(&[], None, None, 0)?.is_none()
        {
            return Err(FilterError::MissingCapability {
                capability: "eval_first_stage_weights",
            });
        }
        Ok(Self {
            model,
            particle_count: config.particle_count,
            resample_threshold: config.resample_threshold,
            mode: config.filter_mode,
        })
    }

    /// Population size
    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    /// Forward variant
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Run a plain or auxiliary particle filter over `obs`.
    ///
    /// # Errors
    /// `Configuration` if the filter was built for conditional filtering,
    /// plus any model or degeneracy error raised along the way.
    pub fn run<R, Rep>(
        &self,
        rng: &mut R,
        obs: &Observations<M::Input, M::Measurement>,
        reporter: &mut Rep,
    ) -> Result<Trajectory<M::Particle>, FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        if self.mode == FilterMode::ConditionalAncestorSampling {
            return Err(FilterError::Configuration {
                description: "conditional filtering needs a reference trajectory".to_string(),
            });
        }
        self.run_inner(rng, obs, None, reporter)
    }

    /// Initial cloud: prior draws weighted by the first observation, if any
    pub fn initialize<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        obs: &Observations<M::Input, M::Measurement>,
    ) -> Result<ParticleCloud<M::Particle>, FilterError> {
        self.initialize_inner(rng, obs, None)
    }

    /// Advance `previous` (step `k - 1`) to step `k`
    pub fn step<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        previous: &ParticleCloud<M::Particle>,
        k: usize,
        obs: &Observations<M::Input, M::Measurement>,
    ) -> Result<ParticleCloud<M::Particle>, FilterError> {
        if self.mode == FilterMode::ConditionalAncestorSampling {
            return Err(FilterError::Configuration {
                description: "conditional filtering needs a reference trajectory".to_string(),
            });
        }
        self.step_inner(rng, previous, k, obs, None)
    }

    fn run_inner<R, Rep>(
        &self,
        rng: &mut R,
        obs: &Observations<M::Input, M::Measurement>,
        conditioning: Option<&Conditioning<'_, M>>,
        reporter: &mut Rep,
    ) -> Result<Trajectory<M::Particle>, FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        let mut trajectory = Trajectory::new();
        if obs.is_empty() {
            return Ok(trajectory);
        }

        let cloud = self.initialize_inner(rng, obs, conditioning)?;
        self.report(&cloud, 0, reporter);
        trajectory.push(cloud);

        for k in 1..obs.len() {
            let previous = trajectory.cloud(k - 1);
            let cloud = self.step_inner(rng, previous, k, obs, conditioning)?;
            self.report(&cloud, k, reporter);
            trajectory.push(cloud);
        }
        Ok(trajectory)
    }

    fn report<Rep: EstimationReporter + ?Sized>(
        &self,
        cloud: &ParticleCloud<M::Particle>,
        k: usize,
        reporter: &mut Rep,
    ) {
        let ess = cloud.ess();
        log::debug!(
            "Forward step {}: ess={:.2}/{}, resampled={}",
            k,
            ess,
            cloud.len(),
            cloud.resampled
        );
        reporter.on_forward_step(&StepSummary {
            step: k,
            ess,
            resampled: cloud.resampled,
        });
    }

    fn initialize_inner<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        obs: &Observations<M::Input, M::Measurement>,
        conditioning: Option<&Conditioning<'_, M>>,
    ) -> Result<ParticleCloud<M::Particle>, FilterError> {
        let n = self.particle_count;
        let mut particles = self.model.create_initial_estimate(rng, n)?;
        if particles.len() != n {
            return Err(FilterError::DimensionMismatch {
                expected: n,
                actual: particles.len(),
                context: "initial particles".to_string(),
            });
        }
        if let Some(cond) = conditioning {
            particles[n - 1] = cond.reference[0].clone();
        }
        let t = obs.t(0);
        let log_weights = self.model.measure(&mut particles, obs.y(0), t)?;
        ParticleCloud::new(t, particles, log_weights, (0..n).collect(), false)
    }

    fn step_inner<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        previous: &ParticleCloud<M::Particle>,
        k: usize,
        obs: &Observations<M::Input, M::Measurement>,
        conditioning: Option<&Conditioning<'_, M>>,
    ) -> Result<ParticleCloud<M::Particle>, FilterError> {
        let n = self.particle_count;
        let u = obs.u(k - 1);
        let t_prev = previous.t;
        let uniform = -(n as f64).ln();

        let (ancestors, mut log_weights, resampled) = match conditioning {
            Some(cond) => {
                let mut ancestors = systematic_resample(rng, &previous.weights(), n - 1);
                let logp =
                    (cond.logp_xnext)(&previous.particles, &cond.reference[k], u, t_prev)?;
                let scores: Vec<f64> = previous
                    .log_weights
                    .iter()
                    .zip(logp.iter())
                    .map(|(w, lp)| w + lp)
                    .collect();
                ancestors.push(sample_log_categorical(rng, &scores, t_prev)?);
                (ancestors, vec![uniform; n], true)
            }
            None if self.mode == FilterMode::Auxiliary => {
                let first_stage = self
                    .model
                    .eval_first_stage_weights(&previous.particles, u, obs.y(k), t_prev)?
                    .ok_or(FilterError::MissingCapability {
                        capability: "eval_first_stage_weights",
                    })?;
                let mut combined: Vec<f64> = previous
                    .log_weights
                    .iter()
                    .zip(first_stage.iter())
                    .map(|(w, f)| w + f)
                    .collect();
                crate::components::resampling::normalize_in_place(&mut combined, t_prev)?;
                let weights: Vec<f64> = combined.iter().map(|w| w.exp()).collect();
                let ancestors = systematic_resample(rng, &weights, n);
                let log_weights = ancestors.iter().map(|&a| uniform - first_stage[a]).collect();
                (ancestors, log_weights, true)
            }
            None => {
                if previous.ess() < self.resample_threshold * n as f64 {
                    let ancestors = systematic_resample(rng, &previous.weights(), n);
                    (ancestors, vec![uniform; n], true)
                } else {
                    ((0..n).collect(), previous.log_weights.clone(), false)
                }
            }
        };

        let mut particles: Vec<M::Particle> = ancestors
            .iter()
            .map(|&a| previous.particles[a].clone())
            .collect();

        match conditioning {
            Some(cond) => {
                self.model
                    .propagate(rng, &mut particles[..n - 1], u, t_prev)?;
                particles[n - 1] = self.model.conditional_particle(
                    &previous.particles[ancestors[n - 1]],
                    &cond.reference[k],
                    u,
                    t_prev,
                )?;
            }
            None => self.model.propagate(rng, &mut particles, u, t_prev)?,
        }

        let t = obs.t(k);
        let log_likelihoods = self.model.measure(&mut particles, obs.y(k), t)?;
        for (w, ll) in log_weights.iter_mut().zip(log_likelihoods.iter()) {
            *w += ll;
        }
        ParticleCloud::new(t, particles, log_weights, ancestors, resampled)
    }
}

impl<'m, M: Smoothing> ForwardFilter<'m, M> {
    /// Run the conditional particle filter with ancestor sampling
    ///
    /// `reference` holds one particle per step of `obs`; it occupies the
    /// last slot of every cloud.
    ///
    /// # Errors
    /// `Configuration` if the filter was not built for conditional filtering
    /// or the reference does not cover every step.
    pub fn run_conditional<R, Rep>(
        &self,
        rng: &mut R,
        obs: &Observations<M::Input, M::Measurement>,
        reference: &[M::Particle],
        reporter: &mut Rep,
    ) -> Result<Trajectory<M::Particle>, FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        if self.mode != FilterMode::ConditionalAncestorSampling {
            return Err(FilterError::Configuration {
                description: "filter was not configured for conditional filtering".to_string(),
            });
        }
        if reference.len() != obs.len() {
            return Err(FilterError::DimensionMismatch {
                expected: obs.len(),
                actual: reference.len(),
                context: "reference trajectory length".to_string(),
            });
        }
        let model = self.model;
        let logp = move |ps: &[M::Particle], next: &M::Particle, u: Option<&M::Input>, t: usize| {
            model.logp_xnext(ps, next, u, t)
        };
        let conditioning = Conditioning {
            reference,
            logp_xnext: &logp,
        };
        self.run_inner(rng, obs, Some(&conditioning), reporter)
    }
}
