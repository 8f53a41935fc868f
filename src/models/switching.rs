//! Mixed model with alternating linear coupling
//!
//! With `a_t = 1` on even steps and `0` on odd steps:
//!
//! ```text
//! ξ_{t+1} = 0.1 a_t ξ_t + (1 - a_t) z_t + v,   v ~ N(0, a_t Qs + (1 - a_t) Qb)
//! z_{t+1} = z_t + w,                           w ~ N(0, Qz)
//! y_t     = ξ_t² + a_t z_t + e,                e ~ N(0, R)
//! ```
//!
//! `ξ_0 = 0` and `z_0 ~ N(0, 1)`. The linear state enters the nonlinear
//! dynamics on odd steps and the measurement on even steps, so both
//! couplings of the Rao-Blackwellized filter are exercised. Observations
//! start at step 1.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::Serialize;

use crate::filter::errors::FilterError;
use crate::model::mixed::{
    Batch, LinearDynamics, MeasurementDynamics, MixedNlGaussian, NonlinearDynamics,
    PredictionDynamics, RbParticle,
};

/// `1` on even steps, `0` on odd steps
#[inline]
pub fn coupling(t: usize) -> f64 {
    if t % 2 == 0 {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchingLinear {
    pub qz: f64,
    pub r: f64,
    pub q_small: f64,
    pub q_big: f64,
    #[serde(skip)]
    z0: DVector<f64>,
    #[serde(skip)]
    p0: DMatrix<f64>,
}

impl Default for SwitchingLinear {
    fn default() -> Self {
        Self::new(0.1, 0.1, 0.1, 0.1)
    }
}

impl SwitchingLinear {
    pub fn new(qz: f64, r: f64, q_small: f64, q_big: f64) -> Self {
        Self {
            qz,
            r,
            q_small,
            q_big,
            z0: DVector::zeros(1),
            p0: DMatrix::identity(1, 1),
        }
    }

    /// Variance of the nonlinear process noise out of step `t`
    pub fn xi_noise(&self, t: usize) -> f64 {
        let a = coupling(t);
        a * self.q_small + (1.0 - a) * self.q_big
    }
}

impl MixedNlGaussian for SwitchingLinear {
    type Input = ();

    fn xi_dim(&self) -> usize {
        1
    }

    fn z_dim(&self) -> usize {
        1
    }

    fn sample_initial_nonlinear<R: Rng + ?Sized>(
        &self,
        _rng: &mut R,
        n: usize,
    ) -> Result<Vec<DVector<f64>>, FilterError> {
        Ok(vec![DVector::zeros(1); n])
    }

    fn z0(&self) -> &DVector<f64> {
        &self.z0
    }

    fn p0(&self) -> &DMatrix<f64> {
        &self.p0
    }

    fn get_nonlin_pred_dynamics(
        &self,
        particles: &[RbParticle],
        _u: Option<&()>,
        t: usize,
    ) -> Result<NonlinearDynamics, FilterError> {
        let a = coupling(t);
        Ok(PredictionDynamics {
            a: Some(Batch::Shared(DMatrix::from_element(1, 1, 1.0 - a))),
            f: Some(Batch::PerParticle(
                particles.iter().map(|p| &p.xi * (0.1 * a)).collect(),
            )),
            q: Some(Batch::Shared(DMatrix::from_element(1, 1, self.xi_noise(t)))),
        })
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
            Some(DMatrix::from_element(1, 1, self.qz)),
        ))
    }

    fn get_meas_dynamics(
        &self,
        particles: &[RbParticle],
        t: usize,
    ) -> Result<MeasurementDynamics, FilterError> {
        Ok(MeasurementDynamics {
            c: Some(Batch::Shared(DMatrix::from_element(1, 1, coupling(t)))),
            h: Some(Batch::PerParticle(
                particles.iter().map(|p| p.xi.map(|v| v * v)).collect(),
            )),
            r: Some(Batch::Shared(DMatrix::from_element(1, 1, self.r))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::rng::SimpleRng;
    use crate::model::mixed::RaoBlackwellized;
    use crate::model::traits::ParticleFiltering;

    #[test]
    fn test_coupling_alternates() {
        assert_eq!(coupling(0), 1.0);
        assert_eq!(coupling(1), 0.0);
        assert_eq!(coupling(2), 1.0);
        let model = SwitchingLinear::new(0.1, 0.1, 0.01, 1.0);
        assert_eq!(model.xi_noise(0), 0.01);
        assert_eq!(model.xi_noise(1), 1.0);
    }

    #[test]
    fn test_odd_step_measures_without_linear_state() {
        let rb = RaoBlackwellized::new(SwitchingLinear::default());
        let mut particles = rb.create_initial_estimate(&mut SimpleRng::new(1), 2).unwrap();
        particles[1].xi[0] = 1.0;
        let y = DVector::from_vec(vec![1.0]);
        // C = 0 on odd steps: only ξ² explains y, and P is unchanged
        let ll = rb.measure(&mut particles, Some(&y), 1).unwrap();
        assert!(ll[1] > ll[0]);
        assert_eq!(particles[0].p, DMatrix::identity(1, 1));
    }

    #[test]
    fn test_odd_step_propagation_conditions_z() {
        let rb = RaoBlackwellized::new(SwitchingLinear::default());
        let mut particles = rb.create_initial_estimate(&mut SimpleRng::new(2), 1).unwrap();
        // ξ' = z + v on odd steps: observing ξ' shrinks P below 1 + Qz
        rb.propagate(&mut SimpleRng::new(3), &mut particles, None, 1).unwrap();
        assert!(particles[0].p[(0, 0)] < 1.0 + 0.1);
    }
}
