//! Reference models
//!
//! Small, well-understood models used by the tests, the benchmarks and the
//! documentation examples, together with dataset generators.

pub mod dataset;
pub mod linear_gaussian;
pub mod nonlinear_benchmark;
pub mod switching;

pub use linear_gaussian::{LinearGaussian1d, LinearGaussianRb};
pub use nonlinear_benchmark::NonlinearBenchmark;
pub use switching::SwitchingLinear;
