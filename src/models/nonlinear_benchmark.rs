//! Standard nonlinear benchmark model
//!
//! ```text
//! x_{t+1} = 0.5 x_t + 25 x_t / (1 + x_t²) + 8 cos(1.2 t) + v,   v ~ N(0, Q)
//! y_t     = 0.05 x_t² + e,                                     e ~ N(0, R)
//! x_0     ~ N(0, P0)
//! ```
//!
//! The bimodal measurement makes the filtering distribution multimodal,
//! which is what makes the model a common test bed for particle methods.
//! `θ = (Q, R)`; the M-step is closed-form by default and can be switched
//! to the bounded numeric search.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;

use super::linear_gaussian::{variance_pair, MIN_VARIANCE};
use crate::common::linalg::log_normal_scalar;
use crate::filter::errors::FilterError;
use crate::model::traits::{ParameterEstimation, ParticleFiltering, Smoothing};
use crate::paramest::accumulator::SufficientStatisticAccumulator;
use crate::types::{Observations, SmoothedTrajectory};

/// Deterministic part of the transition
#[inline]
pub fn transition_mean(x: f64, t: usize) -> f64 {
    0.5 * x + 25.0 * x / (1.0 + x * x) + 8.0 * (1.2 * t as f64).cos()
}

/// Noise-free measurement
#[inline]
pub fn measurement_mean(x: f64) -> f64 {
    0.05 * x * x
}

/// Scalar benchmark with a multimodal transition and a squared measurement
///
/// `x[t+1] = transition_mean(x[t], t) + v`, `y[t] = 0.05 x[t]^2 + e`, with
/// `v ~ N(0, q)`, `e ~ N(0, r)` and `x[0] ~ N(0, p0)`. The parameters are
/// `(q, r)`.
#[derive(Debug, Clone, Serialize)]
pub struct NonlinearBenchmark {
    q: f64,
    r: f64,
    p0: f64,
    analytic_mstep: bool,
}

impl NonlinearBenchmark {
    /// Model with the closed-form M-step enabled
    pub fn new(q: f64, r: f64, p0: f64) -> Self {
        Self {
            q,
            r,
            p0,
            analytic_mstep: true,
        }
    }

    /// Use the bounded numeric M-step instead of the closed form
    pub fn with_numeric_mstep(mut self) -> Self {
        self.analytic_mstep = false;
        self
    }

    /// Process noise variance
    pub fn q(&self) -> f64 {
        self.q
    }

    /// Measurement noise variance
    pub fn r(&self) -> f64 {
        self.r
    }

    fn mean_sq_process_error(&self, traj: &SmoothedTrajectory<f64>, obs: &Observations<(), f64>) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for k in 0..traj.len().saturating_sub(1) {
            let t = obs.t(k);
            for (x, x_next) in traj.at(k).iter().zip(traj.at(k + 1)) {
                sum += (x_next - transition_mean(*x, t)).powi(2);
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }

    fn mean_sq_measurement_error(&self, traj: &SmoothedTrajectory<f64>, obs: &Observations<(), f64>) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for k in 0..traj.len() {
            if let Some(&y) = obs.y(k) {
                for &x in traj.at(k) {
                    sum += (measurement_mean(x) - y).powi(2);
                    count += 1;
                }
            }
        }
        (count > 0).then(|| sum / count as f64)
    }
}

impl ParticleFiltering for NonlinearBenchmark {
    type Particle = f64;
    type Noise = f64;
    type Input = ();
    type Measurement = f64;

    fn create_initial_estimate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
    ) -> Result<Vec<f64>, FilterError> {
        let sd = self.p0.sqrt();
        Ok((0..n).map(|_| sd * rng.sample::<f64, _>(StandardNormal)).collect())
    }

    fn sample_process_noise<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        particles: &[f64],
        _u: Option<&()>,
        _t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        let sd = self.q.sqrt();
        Ok(particles
            .iter()
            .map(|_| sd * rng.sample::<f64, _>(StandardNormal))
            .collect())
    }

    fn update(
        &self,
        particles: &mut [f64],
        _u: Option<&()>,
        noise: &[f64],
        t: usize,
    ) -> Result<(), FilterError> {
        for (x, v) in particles.iter_mut().zip(noise) {
            *x = transition_mean(*x, t) + v;
        }
        Ok(())
    }

    fn measure(
        &self,
        particles: &mut [f64],
        y: Option<&f64>,
        _t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        match y {
            Some(&y) => particles
                .iter()
                .map(|&x| log_normal_scalar(measurement_mean(x) - y, self.r))
                .collect(),
            None => Ok(vec![0.0; particles.len()]),
        }
    }
}

impl Smoothing for NonlinearBenchmark {
    fn logp_xnext(
        &self,
        particles: &[f64],
        next: &f64,
        _u: Option<&()>,
        t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        particles
            .iter()
            .map(|&x| log_normal_scalar(next - transition_mean(x, t), self.q))
            .collect()
    }

    fn logp_xnext_max(
        &self,
        _particles: &[f64],
        _u: Option<&()>,
        _t: usize,
    ) -> Result<Option<f64>, FilterError> {
        log_normal_scalar(0.0, self.q).map(Some)
    }
}

impl ParameterEstimation for NonlinearBenchmark {
    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), FilterError> {
        let (q, r) = variance_pair(params)?;
        self.q = q;
        self.r = r;
        Ok(())
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.q, self.r])
    }

    fn param_bounds(&self) -> Vec<(Option<f64>, Option<f64>)> {
        vec![(Some(MIN_VARIANCE), None); 2]
    }

    fn eval_logp_x0(&self, particles: &[f64], _t: usize) -> Result<f64, FilterError> {
        if particles.is_empty() {
            return Ok(0.0);
        }
        let total = particles
            .iter()
            .map(|&x| log_normal_scalar(x, self.p0))
            .sum::<Result<f64, FilterError>>()?;
        Ok(total / particles.len() as f64)
    }

    fn maximize_weighted_analytic(
        &self,
        stats: &SufficientStatisticAccumulator<f64>,
        obs: &Observations<(), f64>,
    ) -> Result<Option<DVector<f64>>, FilterError> {
        if !self.analytic_mstep {
            return Ok(None);
        }
        let q = stats.weighted_sum(|traj| Ok(self.mean_sq_process_error(traj, obs).unwrap_or(self.q)))?;
        let r = stats.weighted_sum(|traj| Ok(self.mean_sq_measurement_error(traj, obs).unwrap_or(self.r)))?;
        Ok(Some(DVector::from_vec(vec![
            q.max(MIN_VARIANCE),
            r.max(MIN_VARIANCE),
        ])))
    }
}
