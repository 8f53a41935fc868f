//! Core algorithmic components
//!
//! This module provides the shared building blocks used by the filters and
//! smoothers:
//!
//! - [`kalman`] - Per-particle Kalman predict/update and a closed-form reference filter
//! - [`resampling`] - Log-weight normalization, effective sample size, resampling

pub mod kalman;
pub mod resampling;

pub use kalman::{kalman_filter, KalmanFilterResult, LinearGaussianModel};
pub use resampling::{effective_sample_size, systematic_resample};
