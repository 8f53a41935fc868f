//! Ancestral paths
//!
//! Picks a final particle by weight and follows the parent indices recorded
//! during filtering back to the first step. Cheap, but paths coalesce
//! quickly when the filter resamples often.

use rand::Rng;

use super::{resmooth_path, BackwardDraw};
use crate::components::resampling::sample_categorical;
use crate::filter::errors::FilterError;
use crate::model::traits::Smoothing;
use crate::types::{Observations, Trajectory};

/// Particle indices of the lineage ending at `last` on the final step
pub fn lineage<P>(trajectory: &Trajectory<P>, last: usize) -> Vec<usize> {
    let steps = trajectory.len();
    let mut indices = vec![0; steps];
    if steps == 0 {
        return indices;
    }
    indices[steps - 1] = last;
    for k in (1..steps).rev() {
        indices[k - 1] = trajectory.cloud(k).ancestors[indices[k]];
    }
    indices
}

/// Draw one ancestral path
pub fn ancestral_draw<M, R>(
    model: &M,
    rng: &mut R,
    trajectory: &Trajectory<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
) -> Result<BackwardDraw<M::Particle>, FilterError>
where
    M: Smoothing,
    R: Rng + ?Sized,
{
    let last = match trajectory.last() {
        Some(cloud) => sample_categorical(rng, &cloud.weights()),
        None => {
            return Ok(BackwardDraw {
                path: Vec::new(),
                fallbacks: 0,
            })
        }
    };
    let indices = lineage(trajectory, last);
    Ok(BackwardDraw {
        path: resmooth_path(model, rng, trajectory, obs, &indices)?,
        fallbacks: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticleCloud;

    #[test]
    fn test_lineage_follows_ancestors() {
        let mut traj = Trajectory::new();
        traj.push(ParticleCloud::uniform(0, vec![0.0, 1.0, 2.0]));
        traj.push(ParticleCloud::new(1, vec![10.0, 11.0, 12.0], vec![0.0; 3], vec![2, 2, 0], true).unwrap());
        traj.push(ParticleCloud::new(2, vec![20.0, 21.0, 22.0], vec![0.0; 3], vec![1, 0, 0], true).unwrap());
        assert_eq!(lineage(&traj, 0), vec![2, 1, 0]);
        assert_eq!(lineage(&traj, 1), vec![2, 0, 1]);
        assert_eq!(lineage(&traj, 2), vec![2, 0, 2]);
    }
}
