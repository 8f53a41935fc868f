//! Scalar random walk observed in Gaussian noise
//!
//! ```text
//! x_{t+1} = x_t + w,   w ~ N(0, Q)
//! y_t     = x_t + e,   e ~ N(0, R)
//! x_0     ~ N(0, P0)
//! ```
//!
//! Available as a plain particle model ([`LinearGaussian1d`]) with a
//! closed-form M-step for `θ = (Q, R)`, and as a Rao-Blackwellized model
//! with an empty nonlinear state ([`LinearGaussianRb`]) whose filter is
//! exactly the Kalman filter.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;

use crate::common::linalg::log_normal_scalar;
use crate::components::kalman::LinearGaussianModel;
use crate::filter::errors::FilterError;
use crate::model::mixed::{
    LinearDynamics, MeasurementDynamics, MixedNlGaussian, MixedParameters, NonlinearDynamics,
    PredictionDynamics, RaoBlackwellized, RbParticle,
};
use crate::model::traits::{ParameterEstimation, ParticleFiltering, Smoothing};
use crate::paramest::accumulator::SufficientStatisticAccumulator;
use crate::types::Observations;

/// Smallest variance the estimators may return
pub const MIN_VARIANCE: f64 = 1e-5;

/// Parameter vector `(Q, R)` checked for length and positivity
pub(crate) fn variance_pair(params: &DVector<f64>) -> Result<(f64, f64), FilterError> {
    if params.len() != 2 {
        return Err(FilterError::DimensionMismatch {
            expected: 2,
            actual: params.len(),
            context: "parameter vector (Q, R)".to_string(),
        });
    }
    let (q, r) = (params[0], params[1]);
    if !(q > 0.0 && r > 0.0 && q.is_finite() && r.is_finite()) {
        return Err(FilterError::Configuration {
            description: format!("variances must be positive, got Q={}, R={}", q, r),
        });
    }
    Ok((q, r))
}

/// Random walk particle model
#[derive(Debug, Clone, Serialize)]
pub struct LinearGaussian1d {
    q: f64,
    r: f64,
    p0: f64,
}

impl LinearGaussian1d {
    /// `x[t+1] = x[t] + v`, `y[t] = x[t] + e` with `v ~ N(0, q)`,
    /// `e ~ N(0, r)` and `x[0] ~ N(0, p0)`
    ///
    /// Variances are not checked here; a non-positive one surfaces as
    /// `NotPositiveDefinite` on the first density evaluation.
    pub fn new(q: f64, r: f64, p0: f64) -> Self {
        Self { q, r, p0 }
    }

    /// Process noise variance
    pub fn q(&self) -> f64 {
        self.q
    }

    /// Measurement noise variance
    pub fn r(&self) -> f64 {
        self.r
    }

    /// Initial state variance
    pub fn p0(&self) -> f64 {
        self.p0
    }

    /// Same model in matrix form, for [`kalman_filter`](crate::components::kalman::kalman_filter)
    pub fn kalman_model(&self) -> LinearGaussianModel {
        let scalar = |v: f64| DMatrix::from_element(1, 1, v);
        LinearGaussianModel {
            f: scalar(1.0),
            q: scalar(self.q),
            h: scalar(1.0),
            r: scalar(self.r),
            m0: DVector::zeros(1),
            p0: scalar(self.p0),
        }
    }

    /// Same model with the state kept in closed form
    pub fn rao_blackwellized(&self) -> RaoBlackwellized<LinearGaussianRb> {
        RaoBlackwellized::new(LinearGaussianRb::new(self.q, self.r, self.p0))
    }
}

impl ParticleFiltering for LinearGaussian1d {
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
        _t: usize,
    ) -> Result<(), FilterError> {
        for (x, w) in particles.iter_mut().zip(noise) {
            *x += w;
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
                .map(|&x| log_normal_scalar(y - x, self.r))
                .collect(),
            None => Ok(vec![0.0; particles.len()]),
        }
    }
}

impl Smoothing for LinearGaussian1d {
    fn logp_xnext(
        &self,
        particles: &[f64],
        next: &f64,
        _u: Option<&()>,
        _t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        particles
            .iter()
            .map(|&x| log_normal_scalar(next - x, self.q))
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

impl ParameterEstimation for LinearGaussian1d {
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

    /// `Q` and `R` are weighted mean squared increments and residuals
    fn maximize_weighted_analytic(
        &self,
        stats: &SufficientStatisticAccumulator<f64>,
        obs: &Observations<(), f64>,
    ) -> Result<Option<DVector<f64>>, FilterError> {
        let q = stats.weighted_sum(|traj| {
            let mut sum = 0.0;
            let mut count = 0usize;
            for k in 0..traj.len().saturating_sub(1) {
                for (x, x_next) in traj.at(k).iter().zip(traj.at(k + 1)) {
                    sum += (x_next - x).powi(2);
                    count += 1;
                }
            }
            Ok(if count > 0 { sum / count as f64 } else { self.q })
        })?;
        let r = stats.weighted_sum(|traj| {
            let mut sum = 0.0;
            let mut count = 0usize;
            for k in 0..traj.len() {
                if let Some(&y) = obs.y(k) {
                    for &x in traj.at(k) {
                        sum += (y - x).powi(2);
                        count += 1;
                    }
                }
            }
            Ok(if count > 0 { sum / count as f64 } else { self.r })
        })?;
        Ok(Some(DVector::from_vec(vec![
            q.max(MIN_VARIANCE),
            r.max(MIN_VARIANCE),
        ])))
    }
}

// ============================================================================
// Rao-Blackwellized form
// ============================================================================

/// Random walk as a mixed model with no nonlinear state
#[derive(Debug, Clone)]
pub struct LinearGaussianRb {
    q: f64,
    r: f64,
    z0: DVector<f64>,
    p0: DMatrix<f64>,
}

impl LinearGaussianRb {
    pub fn new(q: f64, r: f64, p0: f64) -> Self {
        Self {
            q,
            r,
            z0: DVector::zeros(1),
            p0: DMatrix::from_element(1, 1, p0),
        }
    }
}

impl MixedNlGaussian for LinearGaussianRb {
    type Input = ();

    fn xi_dim(&self) -> usize {
        0
    }

    fn z_dim(&self) -> usize {
        1
    }

    fn sample_initial_nonlinear<R: Rng + ?Sized>(
        &self,
        _rng: &mut R,
        n: usize,
    ) -> Result<Vec<DVector<f64>>, FilterError> {
        Ok(vec![DVector::zeros(0); n])
    }

    fn z0(&self) -> &DVector<f64> {
        &self.z0
    }

    fn p0(&self) -> &DMatrix<f64> {
        &self.p0
    }

    fn get_nonlin_pred_dynamics(
        &self,
        _particles: &[RbParticle],
        _u: Option<&()>,
        _t: usize,
    ) -> Result<NonlinearDynamics, FilterError> {
        Ok(NonlinearDynamics::default())
    }

    fn get_lin_pred_dynamics(
        &self,
        _particles: &[RbParticle],
        _u: Option<&()>,
        _t: usize,
    ) -> Result<LinearDynamics, FilterError> {
        Ok(PredictionDynamics::shared(
            None,
            None,
            Some(DMatrix::from_element(1, 1, self.q)),
        ))
    }

    fn get_meas_dynamics(
        &self,
        _particles: &[RbParticle],
        _t: usize,
    ) -> Result<MeasurementDynamics, FilterError> {
        Ok(MeasurementDynamics::shared(
            Some(DMatrix::identity(1, 1)),
            None,
            Some(DMatrix::from_element(1, 1, self.r)),
        ))
    }
}

impl MixedParameters for LinearGaussianRb {
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

    fn logp_xi0(&self, _xi: &DVector<f64>) -> Result<f64, FilterError> {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::rng::SimpleRng;
    use crate::types::SmoothedTrajectory;

    #[test]
    fn test_missing_observation_is_neutral() {
        let model = LinearGaussian1d::new(1.0, 0.1, 5.0);
        let mut particles = vec![0.0, 1.0, -2.0];
        assert_eq!(model.measure(&mut particles, None, 0).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_zero_variance_is_an_error() {
        let model = LinearGaussian1d::new(0.0, 0.0, 1.0);
        let mut particles = vec![0.0, 1.0];
        let err = model.measure(&mut particles, Some(&0.5), 0).unwrap_err();
        assert!(matches!(err, FilterError::NotPositiveDefinite { .. }));
        assert!(model.logp_xnext(&particles, &0.0, None, 0).is_err());
        assert!(model.logp_xnext_max(&particles, None, 0).is_err());
    }

    #[test]
    fn test_bound_is_transition_peak() {
        let model = LinearGaussian1d::new(0.5, 0.1, 5.0);
        let bound = model.logp_xnext_max(&[0.0], None, 0).unwrap().unwrap();
        let lp = model.logp_xnext(&[0.3, 1.0, -4.0], &0.3, None, 0).unwrap();
        assert!((lp[0] - bound).abs() < 1e-12);
        assert!(lp.iter().all(|&v| v <= bound));
    }

    #[test]
    fn test_analytic_mstep_recovers_increments() {
        // One ensemble, one path 0, 1, 3: increments 1 and 2, Q = 2.5
        let traj = SmoothedTrajectory::from_time_major(vec![vec![0.0], vec![1.0], vec![3.0]]).unwrap();
        let mut stats = SufficientStatisticAccumulator::new();
        stats.update(traj, 1.0, 1e-6).unwrap();
        // Residuals 0.5, -0.5, 1 over observed steps: R = 0.5
        let obs: Observations<(), f64> = Observations::new(vec![Some(0.5), Some(0.5), Some(4.0)]);

        let model = LinearGaussian1d::new(1.0, 1.0, 1.0);
        let params = model
            .maximize_weighted_analytic(&stats, &obs)
            .unwrap()
            .unwrap();
        assert!((params[0] - 2.5).abs() < 1e-12);
        assert!((params[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_set_params_validates() {
        let mut model = LinearGaussian1d::new(1.0, 1.0, 1.0);
        assert!(model.set_params(&DVector::from_vec(vec![1.0])).is_err());
        assert!(model.set_params(&DVector::from_vec(vec![-1.0, 1.0])).is_err());
        model.set_params(&DVector::from_vec(vec![0.3, 0.2])).unwrap();
        assert_eq!(model.params(), DVector::from_vec(vec![0.3, 0.2]));
    }

    #[test]
    fn test_prior_spread() {
        let model = LinearGaussian1d::new(1.0, 1.0, 4.0);
        let xs = model
            .create_initial_estimate(&mut SimpleRng::new(9), 4000)
            .unwrap();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!(mean.abs() < 0.15);
        assert!((var - 4.0).abs() < 0.4);
    }
}
