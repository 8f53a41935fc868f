//! Model interface
//!
//! - [`traits`] - Capability traits every model implements a subset of
//! - [`mixed`] - Mixed linear/nonlinear Gaussian models and the Rao-Blackwellized adapter
//! - [`lookahead`] - Extended and unscented first-stage weights for auxiliary filtering

pub mod lookahead;
pub mod mixed;
pub mod traits;

pub use lookahead::LookAhead;
pub use mixed::{
    Batch, LinearDynamics, MeasurementDynamics, MixedNlGaussian, MixedParameters,
    NonlinearDynamics, PredictionDynamics, RaoBlackwellized, RbParticle,
};
pub use traits::{MaybeSync, ParameterEstimation, ParticleFiltering, Smoothing};
