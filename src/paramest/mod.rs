//! Driving loop and parameter estimation
//!
//! - [`simulator`] - forward filter plus optional backward pass in one call
//! - [`accumulator`] - stochastic approximation of the expected log-likelihood
//! - [`numeric`] - bounded Nelder-Mead M-step
//! - [`psaem`] - particle stochastic approximation EM

pub mod accumulator;
pub mod numeric;
pub mod psaem;
pub mod simulator;

pub use accumulator::{SufficientStatisticAccumulator, WeightedEnsemble};
pub use numeric::{maximize_numeric, BoundTransform, MStepOutcome};
pub use psaem::{IterationResult, Psaem, StopPredicate};
pub use simulator::{filter, simulate, SimulationResult};
