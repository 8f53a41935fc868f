//! Numerical constants used throughout the inference engine
//!
//! These are defaults and guards, kept separate from the user-facing
//! configuration structs which may override several of them.

/// Default resampling threshold as a fraction of the particle count
///
/// Resampling is triggered when `ESS < threshold * N`.
pub const DEFAULT_RESAMPLE_THRESHOLD: f64 = 2.0 / 3.0;

/// Default number of proposals tried by the rejection-sampling smoother
/// before it falls back to the exact weighted backward draw.
pub const DEFAULT_REJECTION_ATTEMPTS: usize = 10;

/// Default maximum number of inner iterations of the numeric M-step
pub const DEFAULT_NUMERIC_MAX_ITER: u64 = 10;

/// Trajectories in the stochastic approximation ensemble whose weight
/// falls below this value are discarded.
pub const DEFAULT_ENSEMBLE_WEIGHT_THRESHOLD: f64 = 1e-6;

/// Default exponent of the polynomial step size schedule `γ_k = k^-a`
pub const DEFAULT_STEP_SIZE_EXPONENT: f64 = 0.9;

/// Effective sample sizes below this value mark a degenerate step
///
/// An ESS this close to one means a single particle carries all the weight.
pub const DEGENERATE_ESS: f64 = 1.5;

/// Fraction of degenerate steps in one PSAEM iteration above which a
/// degeneracy warning is raised.
pub const DEGENERATE_STEP_FRACTION: f64 = 0.5;

/// Relative step for central finite-difference Jacobians
pub const FINITE_DIFF_STEP: f64 = 1e-6;

/// Tolerance used when checking that a covariance is symmetric
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Standard deviation of the initial Nelder-Mead simplex in the
/// unconstrained parameter space
pub const SIMPLEX_SPREAD: f64 = 0.25;
