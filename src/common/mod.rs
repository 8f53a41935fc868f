//! Common utilities shared by the filters, smoothers and estimators.
//!
//! This module contains numerical constants, linear algebra helpers and the
//! deterministic random source.

pub mod constants;
pub mod linalg;
pub mod rng;
