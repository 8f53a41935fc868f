//! Particle stochastic approximation EM
//!
//! Each iteration:
//!
//! 1. run the configured forward filter; the default conditional particle
//!    filter with ancestor sampling is pinned to the current reference
//!    trajectory, the unconditional filters ignore it,
//! 2. draw `M` smoothed trajectories from its output,
//! 3. blend them into the running ensemble with step size `γ_k`,
//! 4. maximise the averaged expected complete-data log-likelihood.
//!
//! The first smoothed trajectory of the new ensemble becomes the next
//! reference. Iteration stops at `max_iter` or when the caller's predicate,
//! which sees the iteration result and the running ensemble, returns `true`.

use nalgebra::DVector;
use rand::Rng;
use serde::Serialize;

use super::accumulator::SufficientStatisticAccumulator;
use super::simulator::simulate;
use crate::common::constants::{DEGENERATE_ESS, DEGENERATE_STEP_FRACTION};
use crate::filter::errors::FilterError;
use crate::model::traits::{MaybeSync, ParameterEstimation};
use crate::reporter::{EstimationReporter, EstimationWarning};
use crate::types::{
    FilterConfig, FilterMode, Observations, PsaemConfig, SmoothedTrajectory, SmootherMode,
    Trajectory,
};

/// Caller predicate for [`Psaem::maximize`]; `true` ends the run
pub type StopPredicate<'a, P> =
    dyn FnMut(&IterationResult, &SufficientStatisticAccumulator<P>) -> bool + 'a;

/// Outcome of one PSAEM iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    /// 1-based iteration number
    pub iteration: usize,
    /// Parameters after the M-step
    pub params: DVector<f64>,
    /// Averaged `Q(θ)` at those parameters
    pub q_value: f64,
    /// `γ_k` used for this iteration
    pub step_size: f64,
    /// Smallest ESS of the forward filter
    pub min_ess: f64,
    /// More than half of the forward filter's steps were degenerate
    pub degenerate: bool,
    /// Whether the M-step converged (closed forms always do)
    pub optimizer_converged: bool,
}

/// PSAEM estimator owning its model and observations
#[derive(Debug)]
pub struct Psaem<M: ParameterEstimation> {
    model: M,
    obs: Observations<M::Input, M::Measurement>,
    config: PsaemConfig,
    stats: SufficientStatisticAccumulator<M::Particle>,
    reference: Vec<M::Particle>,
    iteration: usize,
}

impl<M> Psaem<M>
where
    M: ParameterEstimation + MaybeSync,
{
    /// # Errors
    /// `Configuration` for an invalid config.
    pub fn new(
        model: M,
        obs: Observations<M::Input, M::Measurement>,
        config: PsaemConfig,
    ) -> Result<Self, FilterError> {
        config.validate()?;
        let stats = match config.max_ensemble_members {
            Some(cap) => SufficientStatisticAccumulator::new().with_max_members(cap),
            None => SufficientStatisticAccumulator::new(),
        };
        Ok(Self {
            model,
            obs,
            config,
            stats,
            reference: Vec::new(),
            iteration: 0,
        })
    }

    /// Start from a given reference trajectory instead of drawing one
    pub fn with_reference(mut self, reference: Vec<M::Particle>) -> Result<Self, FilterError> {
        if reference.len() != self.obs.len() {
            return Err(FilterError::DimensionMismatch {
                expected: self.obs.len(),
                actual: reference.len(),
                context: "reference trajectory length".to_string(),
            });
        }
        self.reference = reference;
        Ok(self)
    }

    /// Model at the latest parameters
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consume the estimator, keeping the fitted model
    pub fn into_model(self) -> M {
        self.model
    }

    /// Observations the estimator was built with
    pub fn observations(&self) -> &Observations<M::Input, M::Measurement> {
        &self.obs
    }

    /// Run settings
    pub fn config(&self) -> &PsaemConfig {
        &self.config
    }

    /// Current reference trajectory
    pub fn reference(&self) -> &[M::Particle] {
        &self.reference
    }

    /// Running ensemble of smoothed trajectories
    pub fn accumulator(&self) -> &SufficientStatisticAccumulator<M::Particle> {
        &self.stats
    }

    /// Completed iterations
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Set `θ_0`, clear the running statistics and, for the conditional
    /// filter without a given reference, draw one from a plain particle
    /// filter and FFBSi at `θ_0`
    pub fn initialize<R, Rep>(
        &mut self,
        rng: &mut R,
        theta0: &DVector<f64>,
        reporter: &mut Rep,
    ) -> Result<(), FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        self.model.set_params(theta0)?;
        self.stats.reset();
        self.iteration = 0;
        reporter.on_initial(theta0);

        if self.is_conditional() && self.reference.len() != self.obs.len() {
            let config = FilterConfig::new(self.config.particle_count, 1)
                .with_smoother_mode(SmootherMode::Full);
            let sim = simulate(&self.model, rng, &self.obs, &config, None, reporter)?;
            self.reference = first_path(sim.smoothed)?;
            log::debug!("Drew initial reference over {} steps", self.reference.len());
        }
        Ok(())
    }

    /// One PSAEM iteration
    ///
    /// # Errors
    /// `Configuration` before [`initialize`](Self::initialize), plus any
    /// filter, smoother or M-step error.
    pub fn step<R, Rep>(&mut self, rng: &mut R, reporter: &mut Rep) -> Result<IterationResult, FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        let conditional = self.is_conditional();
        if conditional && self.reference.len() != self.obs.len() {
            return Err(FilterError::Configuration {
                description: "PSAEM has no reference trajectory; call initialize first".to_string(),
            });
        }
        let k = self.iteration + 1;

        let reference = conditional.then_some(self.reference.as_slice());
        let sim = simulate(
            &self.model,
            rng,
            &self.obs,
            &self.config.filter_config(),
            reference,
            reporter,
        )?;
        let min_ess = sim.trajectory.min_ess();
        let degenerate = self.check_degeneracy(&sim.trajectory, k, reporter);
        let ensemble = sim.smoothed.ok_or(FilterError::Configuration {
            description: "PSAEM needs a smoother to draw trajectories".to_string(),
        })?;
        self.reference = ensemble.path(0).cloned().collect();

        let gamma = self.config.schedule.step_size(k);
        self.stats
            .update(ensemble, gamma, self.config.ensemble_weight_threshold)?;
        let outcome = self
            .model
            .maximize_weighted(&self.stats, &self.obs, self.config.numeric_max_iter)?;
        if !outcome.converged {
            reporter.on_warning(&EstimationWarning::OptimizerNotConverged {
                iteration: k,
                iterations: outcome.iterations,
            });
        }

        self.iteration = k;
        let result = IterationResult {
            iteration: k,
            params: outcome.params,
            q_value: outcome.q_value,
            step_size: gamma,
            min_ess,
            degenerate,
            optimizer_converged: outcome.converged,
        };
        log::info!(
            "PSAEM iteration {}: params={:?}, Q={:.4}, gamma={:.4}, min_ess={:.2}",
            k,
            result.params.as_slice(),
            result.q_value,
            gamma,
            min_ess
        );
        reporter.on_iteration(&result);
        Ok(result)
    }

    /// Run from `theta0` until `max_iter` or until `stop` returns `true`
    ///
    /// `stop` is called after every iteration with its result and the
    /// running ensemble, whose newest member holds the trajectories just
    /// drawn. Returns the final parameters; the model is left at them.
    pub fn maximize<R, Rep>(
        &mut self,
        rng: &mut R,
        theta0: &DVector<f64>,
        mut stop: Option<&mut StopPredicate<'_, M::Particle>>,
        reporter: &mut Rep,
    ) -> Result<DVector<f64>, FilterError>
    where
        R: Rng + ?Sized,
        Rep: EstimationReporter + ?Sized,
    {
        self.initialize(rng, theta0, reporter)?;
        while self.iteration < self.config.max_iter {
            let result = self.step(rng, reporter)?;
            if let Some(stop) = stop.as_deref_mut() {
                if stop(&result, &self.stats) {
                    log::info!("PSAEM stopped by caller after {} iterations", result.iteration);
                    break;
                }
            }
        }
        Ok(self.model.params())
    }

    fn is_conditional(&self) -> bool {
        self.config.filter_mode == FilterMode::ConditionalAncestorSampling
    }

    fn check_degeneracy<Rep: EstimationReporter + ?Sized>(
        &self,
        trajectory: &Trajectory<M::Particle>,
        k: usize,
        reporter: &mut Rep,
    ) -> bool {
        if trajectory.is_empty() {
            return false;
        }
        let degenerate_steps = trajectory
            .clouds()
            .iter()
            .filter(|c| c.ess() < DEGENERATE_ESS)
            .count();
        let fraction = degenerate_steps as f64 / trajectory.len() as f64;
        if fraction > DEGENERATE_STEP_FRACTION {
            log::warn!(
                "Forward filter degenerate on {:.0}% of steps at iteration {}",
                100.0 * fraction,
                k
            );
            reporter.on_warning(&EstimationWarning::Degenerate {
                iteration: k,
                fraction,
            });
            true
        } else {
            false
        }
    }
}

fn first_path<P: Clone>(smoothed: Option<SmoothedTrajectory<P>>) -> Result<Vec<P>, FilterError> {
    match smoothed {
        Some(s) if s.ancestor_count() > 0 => Ok(s.path(0).cloned().collect()),
        _ => Err(FilterError::Configuration {
            description: "smoother produced no trajectory".to_string(),
        }),
    }
}
