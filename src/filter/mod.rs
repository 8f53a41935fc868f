//! Forward filtering
//!
//! - [`forward`] - plain, auxiliary and conditional (ancestor sampling) particle filters
//! - [`errors`] - error types shared by every stage of inference

pub mod errors;
pub mod forward;

pub use errors::{FilterError, OptimizerError};
pub use forward::ForwardFilter;
