//! Synthetic datasets for the reference models
//!
//! Every generator is driven by the caller's generator, so a fixed seed
//! gives a fixed dataset.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

use super::nonlinear_benchmark::{measurement_mean, transition_mean};
use super::switching::{coupling, SwitchingLinear};

/// Ground truth and observations of a scalar model
#[derive(Debug, Clone)]
pub struct ScalarDataset {
    /// True states `x_0 .. x_{T-1}`
    pub x: Vec<f64>,
    /// Observations of every state
    pub y: Vec<Option<f64>>,
}

/// Ground truth and observations of [`SwitchingLinear`]
#[derive(Debug, Clone)]
pub struct SwitchingDataset {
    /// Nonlinear states `ξ_0 .. ξ_T`
    pub xi: Vec<f64>,
    /// Linear states `z_0 .. z_T`
    pub z: Vec<f64>,
    /// Observations of steps `1 ..= T`
    pub y: Vec<Option<DVector<f64>>>,
}

fn normal<R: Rng + ?Sized>(rng: &mut R, var: f64) -> f64 {
    var.sqrt() * rng.sample::<f64, _>(StandardNormal)
}

/// `steps` states and observations of
/// [`LinearGaussian1d`](super::linear_gaussian::LinearGaussian1d)
pub fn simulate_linear_gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    steps: usize,
    q: f64,
    r: f64,
    p0: f64,
) -> ScalarDataset {
    let mut x = Vec::with_capacity(steps);
    let mut y = Vec::with_capacity(steps);
    let mut state = normal(rng, p0);
    for k in 0..steps {
        if k > 0 {
            state += normal(rng, q);
        }
        x.push(state);
        y.push(Some(state + normal(rng, r)));
    }
    ScalarDataset { x, y }
}

/// `steps` states and observations of
/// [`NonlinearBenchmark`](super::nonlinear_benchmark::NonlinearBenchmark)
pub fn simulate_nonlinear_benchmark<R: Rng + ?Sized>(
    rng: &mut R,
    steps: usize,
    q: f64,
    r: f64,
    p0: f64,
) -> ScalarDataset {
    let mut x = Vec::with_capacity(steps);
    let mut y = Vec::with_capacity(steps);
    let mut state = normal(rng, p0);
    for k in 0..steps {
        if k > 0 {
            state = transition_mean(state, k - 1) + normal(rng, q);
        }
        x.push(state);
        y.push(Some(measurement_mean(state) + normal(rng, r)));
    }
    ScalarDataset { x, y }
}

/// `steps` propagations of [`SwitchingLinear`] from `ξ_0 = 0`, `z_0 = 0`
///
/// Use with [`Observations::with_initial_step`](crate::types::Observations::with_initial_step).
pub fn simulate_switching<R: Rng + ?Sized>(
    rng: &mut R,
    model: &SwitchingLinear,
    steps: usize,
) -> SwitchingDataset {
    let mut xi = vec![0.0];
    let mut z = vec![0.0];
    let mut y = Vec::with_capacity(steps);
    for t in 0..steps {
        let a = coupling(t);
        let xi_next = 0.1 * a * xi[t] + (1.0 - a) * z[t] + normal(rng, model.xi_noise(t));
        let z_next = z[t] + normal(rng, model.qz);
        let c = coupling(t + 1);
        y.push(Some(DVector::from_element(
            1,
            xi_next * xi_next + c * z_next + normal(rng, model.r),
        )));
        xi.push(xi_next);
        z.push(z_next);
    }
    SwitchingDataset { xi, z, y }
}
