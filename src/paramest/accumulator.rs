//! Stochastic approximation of the expected complete-data log-likelihood
//!
//! PSAEM replaces the E-step by a running average
//! `Q_k(θ) = (1 - γ_k) Q_{k-1}(θ) + γ_k Q̂_k(θ)`, where `Q̂_k` is the
//! Monte-Carlo estimate from the ensemble drawn at iteration `k`. Because
//! `Q̂` is linear in the ensemble measure, storing every past ensemble with
//! a geometrically decaying weight reproduces this average exactly for any
//! model, without asking it for its sufficient statistics.
//!
//! The price is memory. A member leaves only once its weight falls below
//! the pruning threshold, and under the slowly decaying polynomial
//! schedules PSAEM uses that takes many iterations, so the member count
//! grows with the iteration number. [`with_max_members`] bounds it by
//! evicting the lightest members.
//!
//! [`with_max_members`]: SufficientStatisticAccumulator::with_max_members

use crate::filter::errors::FilterError;
use crate::model::traits::ParameterEstimation;
use crate::types::{Observations, SmoothedTrajectory};

/// One stored ensemble and its mixture weight
#[derive(Debug, Clone)]
pub struct WeightedEnsemble<P> {
    /// Smoothed trajectories drawn at some earlier iteration
    pub trajectory: SmoothedTrajectory<P>,
    /// Mixture weight; weights of all members sum to one
    pub weight: f64,
}

/// Weighted mixture of smoothed ensembles
#[derive(Debug, Clone)]
pub struct SufficientStatisticAccumulator<P> {
    members: Vec<WeightedEnsemble<P>>,
    max_members: Option<usize>,
}

impl<P> Default for SufficientStatisticAccumulator<P> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            max_members: None,
        }
    }
}

impl<P> SufficientStatisticAccumulator<P> {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` members (at least one)
    ///
    /// Past the cap the lightest older members are evicted; the newest
    /// ensemble always stays. Eviction truncates the running average, so
    /// the result is no longer the exact stochastic approximation.
    pub fn with_max_members(mut self, cap: usize) -> Self {
        self.max_members = Some(cap.max(1));
        self
    }

    /// Member cap, if any
    pub fn max_members(&self) -> Option<usize> {
        self.max_members
    }

    /// Forget every stored ensemble; the member cap is kept
    pub fn reset(&mut self) {
        self.members.clear();
    }

    /// Blend in a new ensemble with step size `gamma`
    ///
    /// Existing weights are scaled by `1 - gamma`, the new ensemble enters
    /// with `gamma`, members below `threshold` are dropped, the lightest
    /// older members are evicted down to the member cap and the rest
    /// renormalised. `gamma = 1` discards all history.
    pub fn update(
        &mut self,
        ensemble: SmoothedTrajectory<P>,
        gamma: f64,
        threshold: f64,
    ) -> Result<(), FilterError> {
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(FilterError::Configuration {
                description: format!("step size must be in (0, 1], got {}", gamma),
            });
        }
        for member in &mut self.members {
            member.weight *= 1.0 - gamma;
        }
        self.members.push(WeightedEnsemble {
            trajectory: ensemble,
            weight: gamma,
        });

        let before = self.members.len();
        self.members.retain(|m| m.weight >= threshold);
        if self.members.len() < before {
            log::trace!(
                "Pruned {} ensembles below weight {}",
                before - self.members.len(),
                threshold
            );
        }
        if let Some(cap) = self.max_members {
            let mut evicted = 0usize;
            while self.members.len() > cap {
                let older = &self.members[..self.members.len() - 1];
                let lightest = older
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.weight.total_cmp(&b.1.weight))
                    .map(|(i, _)| i);
                match lightest {
                    Some(i) => {
                        self.members.remove(i);
                        evicted += 1;
                    }
                    None => break,
                }
            }
            if evicted > 0 {
                log::trace!("Evicted {} ensembles above the cap of {}", evicted, cap);
            }
        }
        let total: f64 = self.members.iter().map(|m| m.weight).sum();
        if total > 0.0 {
            for member in &mut self.members {
                member.weight /= total;
            }
        }
        Ok(())
    }

    /// Stored ensembles, oldest first
    pub fn members(&self) -> &[WeightedEnsemble<P>] {
        &self.members
    }

    /// Number of stored ensembles
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Weighted mean over members of a per-ensemble statistic
    ///
    /// Convenience for closed-form M-steps.
    pub fn weighted_sum<F>(&self, mut f: F) -> Result<f64, FilterError>
    where
        F: FnMut(&SmoothedTrajectory<P>) -> Result<f64, FilterError>,
    {
        let mut total = 0.0;
        for member in &self.members {
            total += member.weight * f(&member.trajectory)?;
        }
        Ok(total)
    }

    /// `Q(θ)` at the model's current parameters
    pub fn expected_log_likelihood<M>(
        &self,
        model: &M,
        obs: &Observations<M::Input, M::Measurement>,
    ) -> Result<f64, FilterError>
    where
        M: ParameterEstimation<Particle = P>,
    {
        self.weighted_sum(|traj| {
            if traj.is_empty() {
                return Ok(0.0);
            }
            let x0 = model.eval_logp_x0(traj.at(0), obs.t(0))?;
            let xnext = model.eval_logp_xnext_fulltraj(traj, obs)?;
            let y = model.eval_logp_y_fulltraj(traj, obs)?;
            Ok(x0 + xnext + y)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensemble(value: f64) -> SmoothedTrajectory<f64> {
        SmoothedTrajectory::from_time_major(vec![vec![value], vec![value]]).unwrap()
    }

    #[test]
    fn test_first_update_replaces_history() {
        let mut acc = SufficientStatisticAccumulator::new();
        acc.update(ensemble(1.0), 0.3, 1e-6).unwrap();
        acc.update(ensemble(2.0), 1.0, 1e-6).unwrap();
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.members()[0].trajectory.at(0)[0], 2.0);
        assert!((acc.members()[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_decay_geometrically() {
        let mut acc = SufficientStatisticAccumulator::new();
        acc.update(ensemble(1.0), 1.0, 1e-6).unwrap();
        acc.update(ensemble(2.0), 0.5, 1e-6).unwrap();
        acc.update(ensemble(3.0), 0.25, 1e-6).unwrap();

        let weights: Vec<f64> = acc.members().iter().map(|m| m.weight).collect();
        assert!((weights[0] - 0.375).abs() < 1e-12);
        assert!((weights[1] - 0.375).abs() < 1e-12);
        assert!((weights[2] - 0.25).abs() < 1e-12);

        // Running average of the first state: 0.375 * 1 + 0.375 * 2 + 0.25 * 3
        let mean = acc.weighted_sum(|t| Ok(t.at(0)[0])).unwrap();
        assert!((mean - 1.875).abs() < 1e-12);
    }

    #[test]
    fn test_light_members_are_pruned() {
        let mut acc = SufficientStatisticAccumulator::new();
        acc.update(ensemble(1.0), 1.0, 0.1).unwrap();
        acc.update(ensemble(2.0), 0.95, 0.1).unwrap();
        assert_eq!(acc.len(), 1);
        assert!((acc.members()[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_member_cap_evicts_lightest() {
        let mut acc = SufficientStatisticAccumulator::new().with_max_members(2);
        acc.update(ensemble(1.0), 1.0, 0.0).unwrap();
        acc.update(ensemble(2.0), 0.5, 0.0).unwrap();
        // Before eviction: 0.375, 0.375, 0.25. Ties go to the oldest.
        acc.update(ensemble(3.0), 0.25, 0.0).unwrap();
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.members()[0].trajectory.at(0)[0], 2.0);
        assert_eq!(acc.members()[1].trajectory.at(0)[0], 3.0);
        assert!((acc.members()[0].weight - 0.6).abs() < 1e-12);
        assert!((acc.members()[1].weight - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_member_cap_keeps_newest() {
        let mut acc = SufficientStatisticAccumulator::new().with_max_members(1);
        acc.update(ensemble(1.0), 1.0, 0.0).unwrap();
        acc.update(ensemble(2.0), 0.01, 0.0).unwrap();
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.members()[0].trajectory.at(0)[0], 2.0);
        assert!((acc.members()[0].weight - 1.0).abs() < 1e-12);

        acc.reset();
        assert_eq!(acc.max_members(), Some(1));
    }

    #[test]
    fn test_uncapped_growth_under_slow_schedule() {
        let mut acc = SufficientStatisticAccumulator::new();
        for k in 1..=30 {
            acc.update(ensemble(k as f64), (k as f64).powf(-0.9), 1e-6).unwrap();
        }
        assert_eq!(acc.len(), 30);
    }

    #[test]
    fn test_invalid_step_size() {
        let mut acc = SufficientStatisticAccumulator::new();
        assert!(acc.update(ensemble(1.0), 0.0, 1e-6).is_err());
        assert!(acc.update(ensemble(1.0), 1.5, 1e-6).is_err());
        acc.update(ensemble(1.0), 1.0, 1e-6).unwrap();
        acc.reset();
        assert!(acc.is_empty());
    }
}
