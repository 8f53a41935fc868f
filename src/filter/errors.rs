//! Error types for filters, smoothers and estimators
//!
//! Only conditions that make further inference meaningless are errors.
//! Expected edge cases (missing observations, rejection-sampler starvation,
//! an inner optimizer hitting its iteration cap) are handled in place and
//! at most logged.

use std::fmt;

/// Errors that can occur during filtering, smoothing or estimation
#[derive(Debug, Clone)]
pub enum FilterError {
    /// Matrix inversion failed (singular matrix)
    SingularMatrix {
        /// Description of which matrix failed
        context: String,
    },

    /// A covariance handed to a Gaussian density or sampler has no
    /// Cholesky factor
    NotPositiveDefinite {
        /// Description of which covariance failed
        context: String,
    },

    /// Dimension mismatch between expected and actual
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "particle count", "linear state dimension")
        context: String,
    },

    /// Every particle weight underflowed: the observation is impossible
    /// under the whole population
    DegenerateWeights {
        /// Time step at which the weights collapsed
        timestep: usize,
    },

    /// Configuration error
    Configuration {
        /// Description of the configuration issue
        description: String,
    },

    /// The model lacks a hook the configured mode requires
    MissingCapability {
        /// The hook that was requested
        capability: &'static str,
    },

    /// The numeric M-step failed outright
    Optimizer(OptimizerError),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::SingularMatrix { context } => {
                write!(f, "Matrix inversion failed: {}", context)
            }
            FilterError::NotPositiveDefinite { context } => {
                write!(f, "Covariance is not positive definite: {}", context)
            }
            FilterError::DimensionMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Dimension mismatch for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            FilterError::DegenerateWeights { timestep } => {
                write!(
                    f,
                    "All particle weights are zero at time step {}",
                    timestep
                )
            }
            FilterError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
            FilterError::MissingCapability { capability } => {
                write!(f, "Model does not provide {}", capability)
            }
            FilterError::Optimizer(e) => write!(f, "M-step failed: {}", e),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilterError::Optimizer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OptimizerError> for FilterError {
    fn from(e: OptimizerError) -> Self {
        FilterError::Optimizer(e)
    }
}

/// Errors raised by the bounded numeric M-step
#[derive(Debug, Clone)]
pub enum OptimizerError {
    /// Bounds do not match the parameter vector or are inverted
    InvalidBounds {
        /// Description of the problem
        description: String,
    },

    /// The objective was not finite at the starting point
    NonFiniteStart {
        /// Objective value at the start
        value: f64,
    },

    /// The solver itself reported an error
    Solver {
        /// Message from the solver
        message: String,
    },
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerError::InvalidBounds { description } => {
                write!(f, "Invalid parameter bounds: {}", description)
            }
            OptimizerError::NonFiniteStart { value } => {
                write!(f, "Objective is not finite at the start ({})", value)
            }
            OptimizerError::Solver { message } => write!(f, "Solver error: {}", message),
        }
    }
}

impl std::error::Error for OptimizerError {}
