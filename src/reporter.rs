//! Observability for filtering, smoothing and parameter estimation.
//!
//! This module provides the [`EstimationReporter`] trait. Reporters receive
//! callbacks at key points of a run without polluting the algorithms, and
//! replace plotting callbacks: a caller that wants to draw the particle
//! cloud or the smoothed trajectories does so from the returned data.
//!
//! # Zero-Cost Abstraction
//!
//! The default [`NoOpReporter`] compiles to zero overhead - all callback
//! methods are empty and will be optimized away by the compiler.
//!
//! # Example
//!
//! ```
//! use rbsmc::reporter::{DebugReporter, EstimationReporter, StepSummary};
//!
//! let mut reporter = DebugReporter::new();
//! reporter.on_forward_step(&StepSummary { step: 0, ess: 10.0, resampled: false });
//! assert_eq!(reporter.forward_steps().len(), 1);
//! ```

use nalgebra::DVector;
use serde::Serialize;

use crate::paramest::psaem::IterationResult;

// ============================================================================
// Events
// ============================================================================

/// One forward filter step
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepSummary {
    /// Step index
    pub step: usize,
    /// Effective sample size after weighting
    pub ess: f64,
    /// Whether this step's parents were chosen by resampling
    pub resampled: bool,
}

/// One backward pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothingSummary {
    /// Number of smoothed trajectories
    pub draws: usize,
    /// Length of each trajectory
    pub steps: usize,
    /// Backward draws where rejection sampling gave up and the exact
    /// weighted draw was used
    pub rejection_fallbacks: usize,
}

/// Non-fatal conditions worth surfacing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EstimationWarning {
    /// Most steps of the conditional filter had ESS close to one
    Degenerate {
        /// PSAEM iteration
        iteration: usize,
        /// Fraction of degenerate steps
        fraction: f64,
    },
    /// The numeric M-step stopped at its iteration cap
    OptimizerNotConverged {
        /// PSAEM iteration
        iteration: usize,
        /// Inner iterations used
        iterations: u64,
    },
    /// Rejection sampling fell back to exact draws
    RejectionFallback {
        /// Number of fallbacks during the pass
        count: usize,
    },
}

// ============================================================================
// EstimationReporter Trait
// ============================================================================

/// Observability trait for inference runs.
///
/// All methods have default empty implementations, so you only need
/// to override the events you care about.
///
/// # Example
///
/// ```
/// use rbsmc::reporter::{EstimationReporter, StepSummary};
///
/// struct ResampleCounter(usize);
///
/// impl EstimationReporter for ResampleCounter {
///     fn on_forward_step(&mut self, step: &StepSummary) {
///         if step.resampled {
///             self.0 += 1;
///         }
///     }
/// }
/// ```
pub trait EstimationReporter {
    /// Called once before the first PSAEM iteration with the starting
    /// parameters.
    fn on_initial(&mut self, _params: &DVector<f64>) {}

    /// Called after every forward filter step.
    fn on_forward_step(&mut self, _step: &StepSummary) {}

    /// Called after every backward pass.
    fn on_smoothed(&mut self, _summary: &SmoothingSummary) {}

    /// Called after every PSAEM iteration.
    fn on_iteration(&mut self, _result: &IterationResult) {}

    /// Called for non-fatal conditions.
    fn on_warning(&mut self, _warning: &EstimationWarning) {}
}

impl<T: EstimationReporter + ?Sized> EstimationReporter for &mut T {
    fn on_initial(&mut self, params: &DVector<f64>) {
        (**self).on_initial(params);
    }

    fn on_forward_step(&mut self, step: &StepSummary) {
        (**self).on_forward_step(step);
    }

    fn on_smoothed(&mut self, summary: &SmoothingSummary) {
        (**self).on_smoothed(summary);
    }

    fn on_iteration(&mut self, result: &IterationResult) {
        (**self).on_iteration(result);
    }

    fn on_warning(&mut self, warning: &EstimationWarning) {
        (**self).on_warning(warning);
    }
}

// ============================================================================
// NoOpReporter
// ============================================================================

/// Zero-cost reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl NoOpReporter {
    /// Create a new no-op reporter.
    pub fn new() -> Self {
        Self
    }
}

impl EstimationReporter for NoOpReporter {}

// ============================================================================
// DebugReporter
// ============================================================================

/// Reporter that captures all events for debugging and tests.
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    initial: Vec<DVector<f64>>,
    forward_steps: Vec<StepSummary>,
    smoothed: Vec<SmoothingSummary>,
    iterations: Vec<IterationResult>,
    warnings: Vec<EstimationWarning>,
}

impl DebugReporter {
    /// Create a new debug reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all captured events.
    pub fn clear(&mut self) {
        self.initial.clear();
        self.forward_steps.clear();
        self.smoothed.clear();
        self.iterations.clear();
        self.warnings.clear();
    }

    /// Starting parameters of every PSAEM run.
    pub fn initial_params(&self) -> &[DVector<f64>] {
        &self.initial
    }

    /// Captured forward steps.
    pub fn forward_steps(&self) -> &[StepSummary] {
        &self.forward_steps
    }

    /// Captured backward passes.
    pub fn smoothing_passes(&self) -> &[SmoothingSummary] {
        &self.smoothed
    }

    /// Captured PSAEM iterations.
    pub fn iterations(&self) -> &[IterationResult] {
        &self.iterations
    }

    /// Captured warnings.
    pub fn warnings(&self) -> &[EstimationWarning] {
        &self.warnings
    }

    /// Total number of captured events across all types.
    pub fn total_events(&self) -> usize {
        self.initial.len()
            + self.forward_steps.len()
            + self.smoothed.len()
            + self.iterations.len()
            + self.warnings.len()
    }
}

impl EstimationReporter for DebugReporter {
    fn on_initial(&mut self, params: &DVector<f64>) {
        self.initial.push(params.clone());
    }

    fn on_forward_step(&mut self, step: &StepSummary) {
        self.forward_steps.push(*step);
    }

    fn on_smoothed(&mut self, summary: &SmoothingSummary) {
        self.smoothed.push(*summary);
    }

    fn on_iteration(&mut self, result: &IterationResult) {
        self.iterations.push(result.clone());
    }

    fn on_warning(&mut self, warning: &EstimationWarning) {
        self.warnings.push(warning.clone());
    }
}

// ============================================================================
// LogReporter
// ============================================================================

/// Reporter that forwards events to the `log` facade.
///
/// - `on_initial`, `on_iteration`: INFO
/// - `on_smoothed`: DEBUG
/// - `on_forward_step`: TRACE
/// - `on_warning`: WARN
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl LogReporter {
    /// Create a new logging reporter.
    pub fn new() -> Self {
        Self
    }
}

impl EstimationReporter for LogReporter {
    fn on_initial(&mut self, params: &DVector<f64>) {
        log::info!("PSAEM start: params={:?}", params.as_slice());
    }

    fn on_forward_step(&mut self, step: &StepSummary) {
        log::trace!(
            "Step {}: ess={:.2}, resampled={}",
            step.step,
            step.ess,
            step.resampled
        );
    }

    fn on_smoothed(&mut self, summary: &SmoothingSummary) {
        log::debug!(
            "Smoothed {} trajectories of length {} ({} rejection fallbacks)",
            summary.draws,
            summary.steps,
            summary.rejection_fallbacks
        );
    }

    fn on_iteration(&mut self, result: &IterationResult) {
        log::info!(
            "PSAEM iteration {}: params={:?}, Q={:.4}, gamma={:.4}",
            result.iteration,
            result.params.as_slice(),
            result.q_value,
            result.step_size
        );
    }

    fn on_warning(&mut self, warning: &EstimationWarning) {
        log::warn!("{:?}", warning);
    }
}

// ============================================================================
// CompositeReporter
// ============================================================================

/// Reporter that forwards events to two child reporters.
#[derive(Debug, Clone)]
pub struct CompositeReporter<A: EstimationReporter, B: EstimationReporter> {
    first: A,
    second: B,
}

impl<A: EstimationReporter, B: EstimationReporter> CompositeReporter<A, B> {
    /// Create a new composite reporter.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Get a reference to the first reporter.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// Get a reference to the second reporter.
    pub fn second(&self) -> &B {
        &self.second
    }

    /// Consume and return both reporters.
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: EstimationReporter, B: EstimationReporter> EstimationReporter for CompositeReporter<A, B> {
    fn on_initial(&mut self, params: &DVector<f64>) {
        self.first.on_initial(params);
        self.second.on_initial(params);
    }

    fn on_forward_step(&mut self, step: &StepSummary) {
        self.first.on_forward_step(step);
        self.second.on_forward_step(step);
    }

    fn on_smoothed(&mut self, summary: &SmoothingSummary) {
        self.first.on_smoothed(summary);
        self.second.on_smoothed(summary);
    }

    fn on_iteration(&mut self, result: &IterationResult) {
        self.first.on_iteration(result);
        self.second.on_iteration(result);
    }

    fn on_warning(&mut self, warning: &EstimationWarning) {
        self.first.on_warning(warning);
        self.second.on_warning(warning);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn step(i: usize) -> StepSummary {
        StepSummary {
            step: i,
            ess: 5.0,
            resampled: i % 2 == 0,
        }
    }

    #[test]
    fn test_noop_reporter() {
        let mut reporter = NoOpReporter::new();
        reporter.on_forward_step(&step(0));
        reporter.on_warning(&EstimationWarning::RejectionFallback { count: 1 });
    }

    #[test]
    fn test_debug_reporter_captures_events() {
        let mut reporter = DebugReporter::new();
        assert_eq!(reporter.total_events(), 0);

        reporter.on_initial(&DVector::from_vec(vec![1.0, 2.0]));
        reporter.on_forward_step(&step(0));
        reporter.on_forward_step(&step(1));
        reporter.on_smoothed(&SmoothingSummary {
            draws: 3,
            steps: 2,
            rejection_fallbacks: 0,
        });
        reporter.on_warning(&EstimationWarning::Degenerate {
            iteration: 1,
            fraction: 0.75,
        });

        assert_eq!(reporter.initial_params().len(), 1);
        assert_eq!(reporter.forward_steps().len(), 2);
        assert!(reporter.forward_steps()[0].resampled);
        assert_eq!(reporter.smoothing_passes()[0].draws, 3);
        assert_eq!(reporter.warnings().len(), 1);
        assert_eq!(reporter.total_events(), 5);

        reporter.clear();
        assert_eq!(reporter.total_events(), 0);
    }

    #[test]
    fn test_composite_reporter_forwards_to_both() {
        let mut composite = CompositeReporter::new(DebugReporter::new(), DebugReporter::new());
        composite.on_forward_step(&step(3));
        let (a, b) = composite.into_parts();
        assert_eq!(a.forward_steps(), b.forward_steps());
        assert_eq!(a.forward_steps()[0].step, 3);
    }

    #[test]
    fn test_mut_ref_is_a_reporter() {
        let mut inner = DebugReporter::new();
        {
            let mut by_ref = &mut inner;
            EstimationReporter::on_forward_step(&mut by_ref, &step(0));
        }
        assert_eq!(inner.forward_steps().len(), 1);
    }
}
