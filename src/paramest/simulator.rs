//! Forward filter plus optional backward pass in one call

use rand::Rng;

use crate::filter::errors::FilterError;
use crate::filter::forward::ForwardFilter;
use crate::model::traits::{MaybeSync, ParticleFiltering, Smoothing};
use crate::reporter::EstimationReporter;
use crate::smoothing::smooth;
use crate::types::{FilterConfig, FilterMode, Observations, SmoothedTrajectory, SmootherMode, Trajectory};

/// Output of [`simulate`]
#[derive(Debug, Clone)]
pub struct SimulationResult<P> {
    /// Forward filter output
    pub trajectory: Trajectory<P>,
    /// Backward draws; `None` when no smoother was configured
    pub smoothed: Option<SmoothedTrajectory<P>>,
}

/// Run a plain or auxiliary particle filter over `obs`
///
/// Works for any [`ParticleFiltering`] model; smoothing needs [`simulate`].
pub fn filter<M, R, Rep>(
    model: &M,
    rng: &mut R,
    obs: &Observations<M::Input, M::Measurement>,
    config: &FilterConfig,
    reporter: &mut Rep,
) -> Result<Trajectory<M::Particle>, FilterError>
where
    M: ParticleFiltering,
    R: Rng + ?Sized,
    Rep: EstimationReporter + ?Sized,
{
    ForwardFilter::new(model, config)?.run(rng, obs, reporter)
}

/// Forward pass followed by the configured smoother
///
/// `reference` is required for [`FilterMode::ConditionalAncestorSampling`]
/// and ignored otherwise.
///
/// # Errors
/// `Configuration` for an invalid config or a missing reference, plus any
/// error from the filter, the smoother or the model.
pub fn simulate<M, R, Rep>(
    model: &M,
    rng: &mut R,
    obs: &Observations<M::Input, M::Measurement>,
    config: &FilterConfig,
    reference: Option<&[M::Particle]>,
    reporter: &mut Rep,
) -> Result<SimulationResult<M::Particle>, FilterError>
where
    M: Smoothing + MaybeSync,
    R: Rng + ?Sized,
    Rep: EstimationReporter + ?Sized,
{
    let forward = ForwardFilter::new(model, config)?;
    let trajectory = match (config.filter_mode, reference) {
        (FilterMode::ConditionalAncestorSampling, Some(reference)) => {
            forward.run_conditional(rng, obs, reference, reporter)?
        }
        (FilterMode::ConditionalAncestorSampling, None) => {
            return Err(FilterError::Configuration {
                description: "conditional filtering needs a reference trajectory".to_string(),
            })
        }
        _ => forward.run(rng, obs, reporter)?,
    };

    let smoothed = match config.smoother_mode {
        SmootherMode::None => None,
        mode => Some(smooth(
            model,
            rng,
            &trajectory,
            obs,
            mode,
            config.ancestor_count,
            reporter,
        )?),
    };
    Ok(SimulationResult {
        trajectory,
        smoothed,
    })
}
