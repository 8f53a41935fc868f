//! Configuration types for filtering, smoothing and parameter estimation
//!
//! Plain structs with `Default` and `with_*` builders. Every config
//! serializes to JSON so that a run can be recorded next to its results.

use serde::Serialize;

use crate::common::constants::{
    DEFAULT_ENSEMBLE_WEIGHT_THRESHOLD, DEFAULT_NUMERIC_MAX_ITER, DEFAULT_REJECTION_ATTEMPTS,
    DEFAULT_RESAMPLE_THRESHOLD, DEFAULT_STEP_SIZE_EXPONENT,
};
use crate::filter::errors::FilterError;
use crate::types::Observations;

/// Forward filter variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterMode {
    /// Bootstrap particle filter with ESS-triggered systematic resampling
    ParticleFilter,
    /// Auxiliary particle filter: resample on first-stage look-ahead weights
    /// every step, then correct the second-stage weights
    Auxiliary,
    /// Particle filter conditioned on a reference trajectory, with ancestor
    /// sampling for the reference slot
    ConditionalAncestorSampling,
}

/// Backward pass run after the forward filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmootherMode {
    /// Filtering only
    None,
    /// Trace the forward ancestry of particles drawn at the final step
    Ancestor,
    /// Forward-filter backward-simulation with exact weighted draws
    Full,
    /// FFBSi using rejection sampling against `logp_xnext_max`
    RejectionSampling {
        /// Proposals tried before falling back to the exact draw
        max_attempts: usize,
    },
}

impl SmootherMode {
    /// Rejection sampling with the default attempt cap
    pub fn rejection() -> Self {
        SmootherMode::RejectionSampling {
            max_attempts: DEFAULT_REJECTION_ATTEMPTS,
        }
    }
}

/// Settings for one `simulate` run
#[derive(Debug, Clone, Serialize)]
pub struct FilterConfig {
    /// Filter population size `N`
    pub particle_count: usize,
    /// Number of smoothed trajectories `M`
    pub ancestor_count: usize,
    /// Resample when `ESS < resample_threshold * N`
    pub resample_threshold: f64,
    /// Forward filter variant
    pub filter_mode: FilterMode,
    /// Backward pass
    pub smoother_mode: SmootherMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            particle_count: 100,
            ancestor_count: 1,
            resample_threshold: DEFAULT_RESAMPLE_THRESHOLD,
            filter_mode: FilterMode::ParticleFilter,
            smoother_mode: SmootherMode::None,
        }
    }
}

impl FilterConfig {
    /// Config with the given population sizes and default everything else
    pub fn new(particle_count: usize, ancestor_count: usize) -> Self {
        Self {
            particle_count,
            ancestor_count,
            ..Self::default()
        }
    }

    /// Set the resampling threshold
    pub fn with_resample_threshold(mut self, threshold: f64) -> Self {
        self.resample_threshold = threshold;
        self
    }

    /// Set the forward filter variant
    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    /// Set the backward pass
    pub fn with_smoother_mode(mut self, mode: SmootherMode) -> Self {
        self.smoother_mode = mode;
        self
    }

    /// Check the settings before a run
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.particle_count == 0 {
            return Err(FilterError::Configuration {
                description: "particle_count must be positive".to_string(),
            });
        }
        if self.filter_mode == FilterMode::ConditionalAncestorSampling && self.particle_count < 2 {
            return Err(FilterError::Configuration {
                description: "conditional filtering needs at least 2 particles".to_string(),
            });
        }
        if self.smoother_mode != SmootherMode::None && self.ancestor_count == 0 {
            return Err(FilterError::Configuration {
                description: "ancestor_count must be positive when smoothing".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.resample_threshold) {
            return Err(FilterError::Configuration {
                description: format!(
                    "resample_threshold must lie in [0, 1], got {}",
                    self.resample_threshold
                ),
            });
        }
        if let SmootherMode::RejectionSampling { max_attempts: 0 } = self.smoother_mode {
            return Err(FilterError::Configuration {
                description: "rejection sampling needs at least one attempt".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Step size schedule `γ_k` of the stochastic approximation
///
/// Iterations count from 1 and `γ_1 = 1` in both schedules, so the first
/// iteration discards the initial statistics entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StepSizeSchedule {
    /// `γ_k = 1 / k`
    Harmonic,
    /// `γ_k = k^-exponent`, exponent in `(0.5, 1]`
    Polynomial {
        /// Decay exponent
        exponent: f64,
    },
}

impl Default for StepSizeSchedule {
    fn default() -> Self {
        StepSizeSchedule::Polynomial {
            exponent: DEFAULT_STEP_SIZE_EXPONENT,
        }
    }
}

impl StepSizeSchedule {
    /// Step size for iteration `k` (1-based)
    pub fn step_size(&self, k: usize) -> f64 {
        let k = k.max(1) as f64;
        match self {
            StepSizeSchedule::Harmonic => 1.0 / k,
            StepSizeSchedule::Polynomial { exponent } => k.powf(-exponent),
        }
    }

    /// Σγ = ∞ and Σγ² < ∞ need the exponent in `(0.5, 1]`
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            StepSizeSchedule::Harmonic => Ok(()),
            StepSizeSchedule::Polynomial { exponent } if *exponent > 0.5 && *exponent <= 1.0 => {
                Ok(())
            }
            StepSizeSchedule::Polynomial { exponent } => Err(FilterError::Configuration {
                description: format!("step size exponent must lie in (0.5, 1], got {}", exponent),
            }),
        }
    }
}

/// Settings for a PSAEM run
#[derive(Debug, Clone, Serialize)]
pub struct PsaemConfig {
    /// Population size of the per-iteration filter
    pub particle_count: usize,
    /// Trajectories added to the ensemble each iteration
    pub ancestor_count: usize,
    /// Outer iteration cap
    pub max_iter: usize,
    /// Forward filter of each iteration; only the conditional filter is
    /// steered by the reference trajectory
    pub filter_mode: FilterMode,
    /// Step size schedule
    pub schedule: StepSizeSchedule,
    /// How the per-iteration ensemble is drawn from the forward pass
    pub smoother_mode: SmootherMode,
    /// Apply the first observation to the initial cloud
    pub meas_first: bool,
    /// Ensemble members below this weight are discarded
    pub ensemble_weight_threshold: f64,
    /// Optional cap on stored ensembles; `None` keeps every member above
    /// the weight threshold
    pub max_ensemble_members: Option<usize>,
    /// Iteration cap of the numeric M-step
    pub numeric_max_iter: u64,
}

impl Default for PsaemConfig {
    fn default() -> Self {
        Self {
            particle_count: 50,
            ancestor_count: 1,
            max_iter: 100,
            filter_mode: FilterMode::ConditionalAncestorSampling,
            schedule: StepSizeSchedule::default(),
            smoother_mode: SmootherMode::Ancestor,
            meas_first: true,
            ensemble_weight_threshold: DEFAULT_ENSEMBLE_WEIGHT_THRESHOLD,
            max_ensemble_members: None,
            numeric_max_iter: DEFAULT_NUMERIC_MAX_ITER,
        }
    }
}

impl PsaemConfig {
    /// Config with the given population size and iteration cap
    pub fn new(particle_count: usize, max_iter: usize) -> Self {
        Self {
            particle_count,
            max_iter,
            ..Self::default()
        }
    }

    /// Set the number of trajectories added per iteration
    pub fn with_ancestor_count(mut self, count: usize) -> Self {
        self.ancestor_count = count;
        self
    }

    /// Set the forward filter run each iteration
    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    /// Set the step size schedule
    pub fn with_schedule(mut self, schedule: StepSizeSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set the smoother used to draw the per-iteration ensemble
    pub fn with_smoother_mode(mut self, mode: SmootherMode) -> Self {
        self.smoother_mode = mode;
        self
    }

    /// Choose whether the first observation weights the initial cloud
    pub fn with_meas_first(mut self, meas_first: bool) -> Self {
        self.meas_first = meas_first;
        self
    }

    /// Set the ensemble pruning threshold
    pub fn with_ensemble_weight_threshold(mut self, threshold: f64) -> Self {
        self.ensemble_weight_threshold = threshold;
        self
    }

    /// Cap the number of stored ensembles
    pub fn with_max_ensemble_members(mut self, cap: usize) -> Self {
        self.max_ensemble_members = Some(cap);
        self
    }

    /// Set the numeric M-step iteration cap
    pub fn with_numeric_max_iter(mut self, max_iter: u64) -> Self {
        self.numeric_max_iter = max_iter;
        self
    }

    /// Align raw observations with filter steps according to `meas_first`
    pub fn observations<U, Y>(&self, y: Vec<Option<Y>>) -> Observations<U, Y> {
        if self.meas_first {
            Observations::new(y)
        } else {
            Observations::with_initial_step(y)
        }
    }

    /// Filter settings used for the forward pass of each iteration
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig::new(self.particle_count, self.ancestor_count)
            .with_filter_mode(self.filter_mode)
            .with_smoother_mode(self.smoother_mode)
    }

    /// Check the settings before a run
    pub fn validate(&self) -> Result<(), FilterError> {
        self.schedule.validate()?;
        if self.smoother_mode == SmootherMode::None {
            return Err(FilterError::Configuration {
                description: "PSAEM needs a smoother to draw trajectories".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.ensemble_weight_threshold) {
            return Err(FilterError::Configuration {
                description: format!(
                    "ensemble_weight_threshold must lie in [0, 1), got {}",
                    self.ensemble_weight_threshold
                ),
            });
        }
        if self.max_ensemble_members == Some(0) {
            return Err(FilterError::Configuration {
                description: "max_ensemble_members must be at least 1".to_string(),
            });
        }
        self.filter_config().validate()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FilterConfig::default();
        assert!((config.resample_threshold - 2.0 / 3.0).abs() < 1e-12);
        assert!(config.validate().is_ok());
        assert_eq!(
            SmootherMode::rejection(),
            SmootherMode::RejectionSampling { max_attempts: 10 }
        );
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(FilterConfig::new(0, 1).validate().is_err());
        assert!(FilterConfig::new(10, 0)
            .with_smoother_mode(SmootherMode::Full)
            .validate()
            .is_err());
        assert!(FilterConfig::new(1, 1)
            .with_filter_mode(FilterMode::ConditionalAncestorSampling)
            .validate()
            .is_err());
        assert!(FilterConfig::new(10, 1)
            .with_resample_threshold(1.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_step_sizes() {
        let h = StepSizeSchedule::Harmonic;
        assert_eq!(h.step_size(1), 1.0);
        assert!((h.step_size(4) - 0.25).abs() < 1e-12);
        let p = StepSizeSchedule::Polynomial { exponent: 0.9 };
        assert_eq!(p.step_size(1), 1.0);
        assert!(p.step_size(10) > h.step_size(10));
        assert!(StepSizeSchedule::Polynomial { exponent: 0.4 }.validate().is_err());
    }

    #[test]
    fn test_psaem_config_snapshot() {
        let config = PsaemConfig::new(20, 5).with_schedule(StepSizeSchedule::Harmonic);
        assert!(config.validate().is_ok());
        let json: serde_json::Value = serde_json::from_str(&config.to_json()).unwrap();
        assert_eq!(json["particle_count"], 20);
        assert_eq!(json["schedule"], "Harmonic");
        assert_eq!(json["filter_mode"], "ConditionalAncestorSampling");
        assert!(json["max_ensemble_members"].is_null());
        assert_eq!(
            config.filter_config().filter_mode,
            FilterMode::ConditionalAncestorSampling
        );
    }

    #[test]
    fn test_psaem_filter_mode_is_forwarded() {
        for mode in [FilterMode::ParticleFilter, FilterMode::Auxiliary] {
            let config = PsaemConfig::new(20, 5).with_filter_mode(mode);
            assert!(config.validate().is_ok());
            let filter = config.filter_config();
            assert_eq!(filter.filter_mode, mode);
            assert_eq!(filter.particle_count, 20);
            assert_eq!(filter.smoother_mode, SmootherMode::Ancestor);
        }
    }

    #[test]
    fn test_psaem_member_cap_validated() {
        assert!(PsaemConfig::default()
            .with_max_ensemble_members(0)
            .validate()
            .is_err());
        let config = PsaemConfig::default().with_max_ensemble_members(8);
        assert!(config.validate().is_ok());
        let json: serde_json::Value = serde_json::from_str(&config.to_json()).unwrap();
        assert_eq!(json["max_ensemble_members"], 8);
    }

    #[test]
    fn test_meas_first_alignment() {
        let y = vec![Some(1.0), Some(2.0)];
        let first: Observations<(), f64> = PsaemConfig::default().observations(y.clone());
        assert_eq!(first.len(), 2);
        assert_eq!(first.y(0), Some(&1.0));

        let later: Observations<(), f64> =
            PsaemConfig::default().with_meas_first(false).observations(y);
        assert_eq!(later.len(), 3);
        assert_eq!(later.y(0), None);
        assert_eq!(later.y(1), Some(&1.0));
    }
}
