//! Forward-filter backward-simulation
//!
//! At the final step an index is drawn by filter weight. At every earlier
//! step `t` an ancestor is drawn with probability
//! `∝ w_t^i · p(x_{t+1} | x_t^i)`, where `x_{t+1}` is the state already
//! chosen for the next step. Cost is `O(N)` per step and draw.

use rand::Rng;

use super::BackwardDraw;
use crate::components::resampling::{sample_categorical, sample_log_categorical};
use crate::filter::errors::FilterError;
use crate::model::traits::Smoothing;
use crate::types::{Observations, ParticleCloud, Trajectory};

/// Exact weighted backward draw of one ancestor at a single step
pub fn backward_index<M, R>(
    model: &M,
    rng: &mut R,
    cloud: &ParticleCloud<M::Particle>,
    next: &M::Particle,
    u: Option<&M::Input>,
) -> Result<usize, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
{
    let logp = model.logp_xnext(&cloud.particles, next, u, cloud.t)?;
    if logp.len() != cloud.len() {
        return Err(FilterError::DimensionMismatch {
            expected: cloud.len(),
            actual: logp.len(),
            context: "logp_xnext output".to_string(),
        });
    }
    let scores: Vec<f64> = cloud
        .log_weights
        .iter()
        .zip(logp.iter())
        .map(|(w, lp)| w + lp)
        .collect();
    sample_log_categorical(rng, &scores, cloud.t)
}

/// Draw one smoothed trajectory
pub fn backward_draw<M, R>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
) -> Result<BackwardDraw<M::Particle>, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
{
    backward_pass(model, rng, trajectory, obs, |rng, _k, cloud, next, u| {
        backward_index(model, rng, cloud, next, u).map(|i| (i, false))
    })
}

/// Shared backward recursion; `choose` picks the ancestor at step `k` and
/// reports whether it had to fall back to the exact draw
pub(crate) fn backward_pass<M, R, F>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
    mut choose: F,
) -> Result<BackwardDraw<M::Particle>, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
    F: FnMut(
        &mut R,
        usize,
        &ParticleCloud<M::Particle>,
        &M::Particle,
        Option<&M::Input>,
    ) -> Result<(usize, bool), FilterError>,
{
    let steps = trajectory.len();
    let mut reversed: Vec<M::Particle> = Vec::with_capacity(steps);
    let mut fallbacks = 0;
    let last = match trajectory.last() {
        Some(cloud) => cloud,
        None => {
            return Ok(BackwardDraw {
                path: reversed,
                fallbacks,
            })
        }
    };

    let idx = sample_categorical(rng, &last.weights());
    let x_last = model.sample_smooth(rng, &last.particles[idx], None, obs.u(steps - 1), last.t)?;
    reversed.push(x_last);

    for k in (0..steps - 1).rev() {
        let cloud = trajectory.cloud(k);
        let u = obs.u(k);
        let next = reversed.last().ok_or(FilterError::Configuration {
            description: "empty backward path".to_string(),
        })?;
        let (idx, fell_back) = choose(rng, k, cloud, next, u)?;
        if fell_back {
            fallbacks += 1;
        }
        let smoothed = model.sample_smooth(rng, &cloud.particles[idx], Some(next), u, cloud.t)?;
        log::trace!("Backward step {}: chose particle {}", k, idx);
        reversed.push(smoothed);
    }
    reversed.reverse();
    Ok(BackwardDraw {
        path: reversed,
        fallbacks,
    })
}
