//! Core data types
//!
//! - [`ParticleCloud`] - Weighted particles at one step with their ancestry
//! - [`Trajectory`] - Stored forward filter output
//! - [`SmoothedTrajectory`] - Ensemble of backward-sampled state sequences
//! - [`Observations`] - Observation/input sequence aligned to filter steps
//! - [`FilterConfig`], [`PsaemConfig`] - Run settings

pub mod cloud;
pub mod config;
pub mod trajectory;

pub use cloud::ParticleCloud;
pub use config::{FilterConfig, FilterMode, PsaemConfig, SmootherMode, StepSizeSchedule};
pub use trajectory::{Observations, SmoothedTrajectory, StepData, Trajectory};
