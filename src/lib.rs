/*!
# rbsmc - Rao-Blackwellized sequential Monte Carlo

Particle filtering, smoothing and parameter estimation for state-space
models, with first-class support for mixed linear/nonlinear Gaussian models
whose linear substate is marginalized by per-particle Kalman filters.

## Features

- Forward filters: bootstrap particle filter, auxiliary particle filter with
  extended or unscented look-ahead, conditional particle filter with
  ancestor sampling
- Smoothers: ancestral paths, forward-filter backward-simulation (FFBSi) and
  FFBSi with rejection sampling
- PSAEM parameter estimation with closed-form or bounded numeric M-steps

## Modules

- [`model`] - Model capability traits and the Rao-Blackwellized adapter
- [`filter`] - Forward filter and error types
- [`smoothing`] - Backward passes over a stored trajectory
- [`paramest`] - `simulate` driver and PSAEM
- [`types`] - Particle clouds, trajectories, observations, configuration
- [`components`] - Kalman steps and resampling primitives
- [`reporter`] - Observer hooks for runs
- [`models`] - Reference models and dataset generators
- [`common`] - Low-level utilities

## Example

```rust,no_run
use rbsmc::models::dataset::simulate_linear_gaussian;
use rbsmc::models::LinearGaussian1d;
use rbsmc::paramest::simulate;
use rbsmc::reporter::NoOpReporter;
use rbsmc::types::{FilterConfig, Observations, SmootherMode};
use rbsmc::SimpleRng;

let mut rng = SimpleRng::new(42);
let data = simulate_linear_gaussian(&mut rng, 100, 1.0, 0.1, 5.0);
let obs: Observations<(), f64> = Observations::new(data.y);

let model = LinearGaussian1d::new(1.0, 0.1, 5.0);
let config = FilterConfig::new(200, 20).with_smoother_mode(SmootherMode::Full);
let result = simulate(&model, &mut rng, &obs, &config, None, &mut NoOpReporter).unwrap();

let filtered = result.trajectory.filtered_mean(|x| *x);
let smoothed = result.smoothed.unwrap().mean(|x| *x);
assert_eq!(filtered.len(), smoothed.len());
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Model interface: capability traits, mixed models, look-ahead strategies
pub mod model;

/// Forward particle filters
pub mod filter;

/// Backward smoothing passes
pub mod smoothing;

/// Simulation driver and PSAEM parameter estimation
pub mod paramest;

/// Data types and configuration
pub mod types;

/// Shared algorithmic components (Kalman steps, resampling)
pub mod components;

/// Low-level utilities (linear algebra, RNG, constants)
pub mod common;

/// Observer hooks
pub mod reporter;

/// Reference models used by tests, benchmarks and examples
pub mod models;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Model traits
pub use model::{
    LookAhead, MixedNlGaussian, MixedParameters, ParameterEstimation, ParticleFiltering,
    RaoBlackwellized, RbParticle, Smoothing,
};

// Errors
pub use filter::{FilterError, OptimizerError};

// Drivers
pub use filter::ForwardFilter;
pub use paramest::{
    simulate, IterationResult, Psaem, SimulationResult, StopPredicate, SufficientStatisticAccumulator,
};
pub use smoothing::smooth;

// Data types and configuration
pub use types::{
    FilterConfig, FilterMode, Observations, ParticleCloud, PsaemConfig, SmoothedTrajectory,
    SmootherMode, StepSizeSchedule, Trajectory,
};

// Reporters
pub use reporter::{DebugReporter, EstimationReporter, LogReporter, NoOpReporter};

// Deterministic RNG
pub use common::rng::SimpleRng;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
