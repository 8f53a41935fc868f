//! FFBSi with rejection sampling
//!
//! Proposes an ancestor by filter weight and accepts it with probability
//! `p(x_{t+1} | x_t^i) / exp(bound_t)`, where `bound_t` comes from
//! `logp_xnext_max`. Each proposal costs one density evaluation instead of
//! `N`. After `max_attempts` rejections, or when the model has no bound,
//! the step uses the exact weighted draw, so the output distribution is
//! the same as plain FFBSi.

use rand::Rng;

use super::ffbsi::{backward_index, backward_pass};
use super::BackwardDraw;
use crate::components::resampling::sample_categorical;
use crate::filter::errors::FilterError;
use crate::model::traits::Smoothing;
use crate::types::{Observations, Trajectory};

/// `logp_xnext_max` for every step that has a successor
pub fn transition_bounds<M: Smoothing>(
    model: &M,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
) -> Result<Vec<Option<f64>>, FilterError> {
    (0..trajectory.len().saturating_sub(1))
        .map(|k| {
            let cloud = trajectory.cloud(k);
            model.logp_xnext_max(&cloud.particles, obs.u(k), cloud.t)
        })
        .collect()
}

/// Draw one smoothed trajectory
pub fn rejection_draw<M, R>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
    bounds: &[Option<f64>],
    max_attempts: usize,
) -> Result<BackwardDraw<M::Particle>, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
{
    backward_pass(model, rng, trajectory, obs, |rng, k, cloud, next, u| {
        if let Some(bound) = bounds.get(k).copied().flatten() {
            let weights = cloud.weights();
            for _ in 0..max_attempts {
                let i = sample_categorical(rng, &weights);
                let lp = model.logp_xnext(&cloud.particles[i..=i], next, u, cloud.t)?[0];
                if lp > bound + 1e-9 {
                    log::warn!(
                        "logp_xnext exceeds its bound at t={} ({} > {})",
                        cloud.t,
                        lp,
                        bound
                    );
                }
                let accept: f64 = rng.gen();
                if accept.ln() < lp - bound {
                    return Ok((i, false));
                }
            }
        }
        backward_index(model, rng, cloud, next, u).map(|i| (i, true))
    })
}
