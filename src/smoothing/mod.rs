//! Backward passes over a stored forward trajectory
//!
//! - [`ancestor`] - trace the recorded lineage of particles drawn at the final step
//! - [`ffbsi`] - forward-filter backward-simulation with exact weighted draws
//! - [`rejection`] - FFBSi with rejection sampling against `logp_xnext_max`
//!
//! Every backward draw is independent. Draw `j` gets its own generator,
//! [`SimpleRng::stream`] of one seed taken from the caller's generator, so
//! the result does not depend on whether draws run sequentially or, with
//! the `rayon` feature, in parallel.

pub mod ancestor;
pub mod ffbsi;
pub mod rejection;

use rand::{Rng, RngCore};

use crate::common::rng::SimpleRng;
use crate::filter::errors::FilterError;
use crate::model::traits::{MaybeSync, Smoothing};
use crate::reporter::{EstimationReporter, EstimationWarning, SmoothingSummary};
use crate::types::{Observations, SmoothedTrajectory, SmootherMode, Trajectory};

/// One backward-sampled path, in time order
#[derive(Debug, Clone)]
pub struct BackwardDraw<P> {
    /// States from the first step to the last
    pub path: Vec<P>,
    /// Steps where rejection sampling fell back to the exact draw
    pub fallbacks: usize,
}

/// Draw `count` smoothed trajectories from a forward trajectory
///
/// # Errors
/// `Configuration` for [`SmootherMode::None`], plus any model error.
pub fn smooth<M, R, Rep>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
    mode: SmootherMode,
    count: usize,
    reporter: &mut Rep,
) -> Result<SmoothedTrajectory<M::Particle>, FilterError>
where
    M: Smoothing + MaybeSync,
    R: Rng + ?Sized,
    Rep: EstimationReporter + ?Sized,
{
    if trajectory.len() > obs.len() {
        return Err(FilterError::DimensionMismatch {
            expected: obs.len(),
            actual: trajectory.len(),
            context: "trajectory longer than observations".to_string(),
        });
    }
    let seed = rng.next_u64();
    let draws = match mode {
        SmootherMode::None => {
            return Err(FilterError::Configuration {
                description: "no smoother selected".to_string(),
            })
        }
        SmootherMode::Ancestor => run_draws(count, seed, |rng| {
            ancestor::ancestral_draw(model, rng, trajectory, obs)
        })?,
        SmootherMode::Full => run_draws(count, seed, |rng| {
            ffbsi::backward_draw(model, rng, trajectory, obs)
        })?,
        SmootherMode::RejectionSampling { max_attempts } => {
            let bounds = rejection::transition_bounds(model, trajectory, obs)?;
            run_draws(count, seed, |rng| {
                rejection::rejection_draw(model, rng, trajectory, obs, &bounds, max_attempts)
            })?
        }
    };

    let fallbacks: usize = draws.iter().map(|d| d.fallbacks).sum();
    if fallbacks > 0 {
        log::warn!(
            "Rejection sampling fell back to exact draws {} times over {} trajectories",
            fallbacks,
            count
        );
        reporter.on_warning(&EstimationWarning::RejectionFallback { count: fallbacks });
    }
    reporter.on_smoothed(&SmoothingSummary {
        draws: count,
        steps: trajectory.len(),
        rejection_fallbacks: fallbacks,
    });
    to_time_major(draws, trajectory.len())
}

#[cfg(feature = "rayon")]
fn run_draws<P, F>(count: usize, seed: u64, draw: F) -> Result<Vec<BackwardDraw<P>>, FilterError>
where
    P: Send,
    F: Fn(&mut SimpleRng) -> Result<BackwardDraw<P>, FilterError> + Sync,
{
    use rayon::prelude::*;
    (0..count)
        .into_par_iter()
        .map(|j| draw(&mut SimpleRng::stream(seed, j)))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn run_draws<P, F>(count: usize, seed: u64, draw: F) -> Result<Vec<BackwardDraw<P>>, FilterError>
where
    F: Fn(&mut SimpleRng) -> Result<BackwardDraw<P>, FilterError>,
{
    (0..count)
        .map(|j| draw(&mut SimpleRng::stream(seed, j)))
        .collect()
}

fn to_time_major<P>(
    draws: Vec<BackwardDraw<P>>,
    steps: usize,
) -> Result<SmoothedTrajectory<P>, FilterError> {
    let mut states: Vec<Vec<P>> = (0..steps).map(|_| Vec::with_capacity(draws.len())).collect();
    for draw in draws {
        for (t, p) in draw.path.into_iter().enumerate() {
            states[t].push(p);
        }
    }
    SmoothedTrajectory::from_time_major(states)
}

/// Apply `sample_smooth` from the last step to the first along a chosen
/// index path
pub(crate) fn resmooth_path<M, R>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
    indices: &[usize],
) -> Result<Vec<M::Particle>, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
{
    let steps = trajectory.len();
    let mut reversed: Vec<M::Particle> = Vec::with_capacity(steps);
    for k in (0..steps).rev() {
        let cloud = trajectory.cloud(k);
        let future = reversed.last();
        let smoothed =
            model.sample_smooth(rng, &cloud.particles[indices[k]], future, obs.u(k), cloud.t)?;
        reversed.push(smoothed);
    }
    reversed.reverse();
    Ok(reversed)
}
