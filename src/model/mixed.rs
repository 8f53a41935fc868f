//! Rao-Blackwellized mixed linear/nonlinear Gaussian models
//!
//! The state splits into a nonlinear part `ξ`, carried by particles, and a
//! part `z` that is linear-Gaussian given the `ξ` path, carried by a
//! per-particle Kalman filter:
//!
//! ```text
//! ξ_{t+1} = f_ξ(ξ_t) + A_ξ(ξ_t) z_t + v_ξ,   v_ξ ~ N(0, Q_ξ(ξ_t))
//! z_{t+1} = f_z(ξ_t) + A_z(ξ_t) z_t + v_z,   v_z ~ N(0, Q_z(ξ_t))
//! y_t     = h(ξ_t)   + C(ξ_t) z_t   + e,     e   ~ N(0, R(ξ_t))
//! ```
//!
//! `v_ξ` and `v_z` are independent. A model implements [`MixedNlGaussian`];
//! [`RaoBlackwellized`] turns it into a filterable, smoothable model.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use super::lookahead::{first_stage_weights, LookAhead};
use super::traits::{MaybeSync, ParameterEstimation, ParticleFiltering, Smoothing};
use crate::common::linalg::{
    block_diag, cholesky, log_gaussian_pdf, log_gaussian_peak, sample_gaussian_psd, vstack,
};
use crate::components::kalman;
use crate::filter::errors::FilterError;

/// Matrices for a batch of particles: one shared value or one per particle
#[derive(Debug, Clone)]
pub enum Batch<T> {
    /// Same value for every particle
    Shared(T),
    /// Indexed by particle id
    PerParticle(Vec<T>),
}

impl<T> Batch<T> {
    /// Value for particle `i`
    #[inline]
    pub fn get(&self, i: usize) -> &T {
        match self {
            Batch::Shared(v) => v,
            Batch::PerParticle(vs) => &vs[i],
        }
    }

    fn check_len(&self, n: usize, context: &str) -> Result<(), FilterError> {
        match self {
            Batch::PerParticle(vs) if vs.len() != n => Err(FilterError::DimensionMismatch {
                expected: n,
                actual: vs.len(),
                context: context.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn get<T>(batch: &Option<Batch<T>>, i: usize) -> Option<&T> {
    batch.as_ref().map(|b| b.get(i))
}

fn check<T>(batch: &Option<Batch<T>>, n: usize, context: &str) -> Result<(), FilterError> {
    batch.as_ref().map_or(Ok(()), |b| b.check_len(n, context))
}

/// Transition of one layer for a batch of particles: `x' = f + A z + v`
#[derive(Debug, Clone, Default)]
pub struct PredictionDynamics {
    /// Coupling to the previous linear state
    pub a: Option<Batch<DMatrix<f64>>>,
    /// Offset
    pub f: Option<Batch<DVector<f64>>>,
    /// Process noise covariance
    pub q: Option<Batch<DMatrix<f64>>>,
}

impl PredictionDynamics {
    /// Dynamics shared by every particle
    pub fn shared(
        a: Option<DMatrix<f64>>,
        f: Option<DVector<f64>>,
        q: Option<DMatrix<f64>>,
    ) -> Self {
        Self {
            a: a.map(Batch::Shared),
            f: f.map(Batch::Shared),
            q: q.map(Batch::Shared),
        }
    }

    fn validate(&self, n: usize, layer: &str) -> Result<(), FilterError> {
        check(&self.a, n, layer)?;
        check(&self.f, n, layer)?;
        check(&self.q, n, layer)
    }
}

/// Dynamics of the nonlinear layer `ξ`; `a = None` means `ξ` does not
/// depend on `z`
pub type NonlinearDynamics = PredictionDynamics;

/// Dynamics of the linear layer `z`; `a = None` means identity
pub type LinearDynamics = PredictionDynamics;

/// Measurement relation `y = h + C z + e` for a batch of particles
#[derive(Debug, Clone, Default)]
pub struct MeasurementDynamics {
    /// Coupling to the linear state, `None` = measurement ignores `z`
    pub c: Option<Batch<DMatrix<f64>>>,
    /// Offset
    pub h: Option<Batch<DVector<f64>>>,
    /// Measurement noise covariance
    pub r: Option<Batch<DMatrix<f64>>>,
}

impl MeasurementDynamics {
    /// Measurement relation shared by every particle
    pub fn shared(
        c: Option<DMatrix<f64>>,
        h: Option<DVector<f64>>,
        r: Option<DMatrix<f64>>,
    ) -> Self {
        Self {
            c: c.map(Batch::Shared),
            h: h.map(Batch::Shared),
            r: r.map(Batch::Shared),
        }
    }

    pub(crate) fn validate(&self, n: usize) -> Result<(), FilterError> {
        check(&self.c, n, "measurement dynamics")?;
        check(&self.h, n, "measurement dynamics")?;
        check(&self.r, n, "measurement dynamics")
    }

    /// Predicted measurement `h + C z` for particle `i`, without noise
    pub(crate) fn predict(&self, i: usize, z: &DVector<f64>, y_dim: usize) -> DVector<f64> {
        let mut out = get(&self.h, i).cloned().unwrap_or_else(|| DVector::zeros(y_dim));
        if let Some(c) = get(&self.c, i) {
            out += c * z;
        }
        out
    }

    pub(crate) fn noise(&self, i: usize) -> Result<&DMatrix<f64>, FilterError> {
        get(&self.r, i).ok_or(FilterError::MissingCapability {
            capability: "measurement noise covariance",
        })
    }

    pub(crate) fn coupling(&self, i: usize) -> Option<&DMatrix<f64>> {
        get(&self.c, i)
    }
}

/// Particle of a Rao-Blackwellized model
#[derive(Debug, Clone, PartialEq)]
pub struct RbParticle {
    /// Nonlinear substate
    pub xi: DVector<f64>,
    /// Mean of the linear substate
    pub z: DVector<f64>,
    /// Covariance of the linear substate (zero once smoothed)
    pub p: DMatrix<f64>,
}

impl RbParticle {
    /// Full state `[ξ; z]`
    pub fn state(&self) -> DVector<f64> {
        vstack(&self.xi, &self.z)
    }
}

/// Mixed linear/nonlinear Gaussian model
pub trait MixedNlGaussian {
    /// Control input
    type Input: MaybeSync;

    /// Dimension of `ξ` (may be zero)
    fn xi_dim(&self) -> usize;

    /// Dimension of `z`
    fn z_dim(&self) -> usize;

    /// Draw `n` values of `ξ_0`
    fn sample_initial_nonlinear<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
    ) -> Result<Vec<DVector<f64>>, FilterError>;

    /// Prior mean of `z_0`
    fn z0(&self) -> &DVector<f64>;

    /// Prior covariance of `z_0`
    fn p0(&self) -> &DMatrix<f64>;

    /// Transition of `ξ` from step `t`
    fn get_nonlin_pred_dynamics(
        &self,
        particles: &[RbParticle],
        u: Option<&Self::Input>,
        t: usize,
    ) -> Result<NonlinearDynamics, FilterError>;

    /// Transition of `z` from step `t`
    fn get_lin_pred_dynamics(
        &self,
        particles: &[RbParticle],
        u: Option<&Self::Input>,
        t: usize,
    ) -> Result<LinearDynamics, FilterError>;

    /// Measurement relation at step `t`
    fn get_meas_dynamics(
        &self,
        particles: &[RbParticle],
        t: usize,
    ) -> Result<MeasurementDynamics, FilterError>;

    /// Model-specific first-stage weights, overriding the generic look-ahead
    fn first_stage_weights(
        &self,
        _particles: &[RbParticle],
        _u: Option<&Self::Input>,
        _y: &DVector<f64>,
        _t: usize,
    ) -> Result<Option<Vec<f64>>, FilterError> {
        Ok(None)
    }
}

/// Parameter hooks for a mixed model
pub trait MixedParameters: MixedNlGaussian {
    /// Replace the model parameters
    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), FilterError>;

    /// Current parameters
    fn params(&self) -> DVector<f64>;

    /// `(lower, upper)` bound of every parameter
    fn param_bounds(&self) -> Vec<(Option<f64>, Option<f64>)>;

    /// `log p(ξ_0)`
    fn logp_xi0(&self, xi: &DVector<f64>) -> Result<f64, FilterError>;
}

/// Rao-Blackwellized particle filter model built from a [`MixedNlGaussian`]
#[derive(Debug, Clone)]
pub struct RaoBlackwellized<M> {
    model: M,
    look_ahead: Option<LookAhead>,
}

impl<M: MixedNlGaussian> RaoBlackwellized<M> {
    /// Wrap a mixed model
    pub fn new(model: M) -> Self {
        Self {
            model,
            look_ahead: None,
        }
    }

    /// Enable auxiliary particle filtering with the given look-ahead
    pub fn with_look_ahead(mut self, look_ahead: LookAhead) -> Self {
        self.look_ahead = Some(look_ahead);
        self
    }

    /// Wrapped model
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Wrapped model, mutably
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    fn dynamics(
        &self,
        particles: &[RbParticle],
        u: Option<&M::Input>,
        t: usize,
    ) -> Result<(NonlinearDynamics, LinearDynamics), FilterError> {
        let nl = self.model.get_nonlin_pred_dynamics(particles, u, t)?;
        let lin = self.model.get_lin_pred_dynamics(particles, u, t)?;
        nl.validate(particles.len(), "nonlinear dynamics")?;
        lin.validate(particles.len(), "linear dynamics")?;
        Ok((nl, lin))
    }

    /// Predictive distribution of `ξ_{t+1}` for particle `i`
    fn xi_moments(
        &self,
        particle: &RbParticle,
        nl: &NonlinearDynamics,
        i: usize,
    ) -> (DVector<f64>, DMatrix<f64>) {
        let d = self.model.xi_dim();
        let mut mean = get(&nl.f, i).cloned().unwrap_or_else(|| DVector::zeros(d));
        let mut cov = get(&nl.q, i).cloned().unwrap_or_else(|| DMatrix::zeros(d, d));
        if let Some(a) = get(&nl.a, i) {
            mean += a * &particle.z;
            cov += a * &particle.p * a.transpose();
        }
        (mean, cov)
    }

    /// Joint predictive distribution of `[ξ_{t+1}; z_{t+1}]` for particle `i`
    fn joint_moments(
        &self,
        particle: &RbParticle,
        nl: &NonlinearDynamics,
        lin: &LinearDynamics,
        i: usize,
    ) -> (DVector<f64>, DMatrix<f64>) {
        let (c, offset, noise) = self.stacked_transition(nl, lin, i);
        let mean = &c * &particle.z + offset;
        let cov = &c * &particle.p * c.transpose() + noise;
        (mean, cov)
    }

    /// `[ξ'; z'] = offset + C z + v`, `v ~ N(0, noise)`
    fn stacked_transition(
        &self,
        nl: &NonlinearDynamics,
        lin: &LinearDynamics,
        i: usize,
    ) -> (DMatrix<f64>, DVector<f64>, DMatrix<f64>) {
        let d = self.model.xi_dim();
        let nz = self.model.z_dim();
        let mut c = DMatrix::zeros(d + nz, nz);
        if let Some(a) = get(&nl.a, i) {
            c.view_mut((0, 0), (d, nz)).copy_from(a);
        }
        match get(&lin.a, i) {
            Some(a) => c.view_mut((d, 0), (nz, nz)).copy_from(a),
            None => c.view_mut((d, 0), (nz, nz)).fill_with_identity(),
        }
        let offset = vstack(
            &get(&nl.f, i).cloned().unwrap_or_else(|| DVector::zeros(d)),
            &get(&lin.f, i).cloned().unwrap_or_else(|| DVector::zeros(nz)),
        );
        let noise = block_diag(
            &get(&nl.q, i).cloned().unwrap_or_else(|| DMatrix::zeros(d, d)),
            &get(&lin.q, i).cloned().unwrap_or_else(|| DMatrix::zeros(nz, nz)),
        );
        (c, offset, noise)
    }

    /// Move particle `i` to `xi_next`, conditioning and predicting its
    /// linear substate
    fn advance(
        &self,
        particle: &mut RbParticle,
        xi_next: DVector<f64>,
        nl: &NonlinearDynamics,
        lin: &LinearDynamics,
        i: usize,
    ) -> Result<(), FilterError> {
        if let Some(a) = get(&nl.a, i) {
            if !xi_next.is_empty() {
                let d = xi_next.len();
                let zero_q;
                let q = match get(&nl.q, i) {
                    Some(q) => q,
                    None => {
                        zero_q = DMatrix::zeros(d, d);
                        &zero_q
                    }
                };
                kalman::update(
                    &mut particle.z,
                    &mut particle.p,
                    &xi_next,
                    a,
                    get(&nl.f, i),
                    q,
                )?;
            }
        }
        kalman::predict(
            &mut particle.z,
            &mut particle.p,
            get(&lin.a, i),
            get(&lin.f, i),
            get(&lin.q, i),
        );
        particle.xi = xi_next;
        Ok(())
    }

    /// Look-ahead used for auxiliary filtering, if any
    pub fn look_ahead(&self) -> Option<LookAhead> {
        self.look_ahead
    }
}

impl<M: MixedNlGaussian> ParticleFiltering for RaoBlackwellized<M> {
    type Particle = RbParticle;
    type Noise = DVector<f64>;
    type Input = M::Input;
    type Measurement = DVector<f64>;

    fn create_initial_estimate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
    ) -> Result<Vec<RbParticle>, FilterError> {
        let xis = self.model.sample_initial_nonlinear(rng, n)?;
        if xis.len() != n {
            return Err(FilterError::DimensionMismatch {
                expected: n,
                actual: xis.len(),
                context: "initial nonlinear draws".to_string(),
            });
        }
        let z0 = self.model.z0();
        let p0 = self.model.p0();
        Ok(xis
            .into_iter()
            .map(|xi| RbParticle {
                xi,
                z: z0.clone(),
                p: p0.clone(),
            })
            .collect())
    }

    /// Standard normal draws, coloured by the predictive covariance in `update`
    fn sample_process_noise<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        particles: &[RbParticle],
        _u: Option<&M::Input>,
        _t: usize,
    ) -> Result<Vec<DVector<f64>>, FilterError> {
        let d = self.model.xi_dim();
        Ok(particles
            .iter()
            .map(|_| DVector::from_fn(d, |_, _| rng.sample::<f64, _>(StandardNormal)))
            .collect())
    }

    fn update(
        &self,
        particles: &mut [RbParticle],
        u: Option<&M::Input>,
        noise: &[DVector<f64>],
        t: usize,
    ) -> Result<(), FilterError> {
        if noise.len() != particles.len() {
            return Err(FilterError::DimensionMismatch {
                expected: particles.len(),
                actual: noise.len(),
                context: "process noise draws".to_string(),
            });
        }
        let (nl, lin) = self.dynamics(particles, u, t)?;
        for (i, particle) in particles.iter_mut().enumerate() {
            let (mean, cov) = self.xi_moments(particle, &nl, i);
            let xi_next = if mean.is_empty() {
                mean
            } else {
                let chol = cholesky(&cov, "nonlinear predictive covariance")?;
                mean + chol.l() * &noise[i]
            };
            self.advance(particle, xi_next, &nl, &lin, i)?;
        }
        Ok(())
    }

    fn measure(
        &self,
        particles: &mut [RbParticle],
        y: Option<&DVector<f64>>,
        t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        let y = match y {
            Some(y) => y,
            None => return Ok(vec![0.0; particles.len()]),
        };
        let md = self.model.get_meas_dynamics(particles, t)?;
        md.validate(particles.len())?;
        let mut log_likelihoods = Vec::with_capacity(particles.len());
        for (i, particle) in particles.iter_mut().enumerate() {
            let r = md.noise(i)?;
            let ll = match md.coupling(i) {
                Some(c) => {
                    kalman::update(&mut particle.z, &mut particle.p, y, c, get(&md.h, i), r)?
                        .log_likelihood
                }
                None => {
                    let mean = md.predict(i, &particle.z, y.len());
                    log_gaussian_pdf(y, &mean, r)?
                }
            };
            log_likelihoods.push(ll);
        }
        Ok(log_likelihoods)
    }

    fn eval_first_stage_weights(
        &self,
        particles: &[RbParticle],
        u: Option<&M::Input>,
        y: Option<&DVector<f64>>,
        t: usize,
    ) -> Result<Option<Vec<f64>>, FilterError> {
        let y = match y {
            Some(y) => y,
            None => {
                let supported = self.look_ahead.is_some()
                    || self.model.first_stage_weights(&[], u, &DVector::zeros(0), t)?.is_some();
                return Ok(supported.then(|| vec![0.0; particles.len()]));
            }
        };
        if let Some(weights) = self.model.first_stage_weights(particles, u, y, t)? {
            return Ok(Some(weights));
        }
        match self.look_ahead {
            Some(strategy) => {
                let (nl, lin) = self.dynamics(particles, u, t)?;
                let predicted = particles
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let (xi, xi_cov) = self.xi_moments(p, &nl, i);
                        let mut z = p.z.clone();
                        let mut cov = p.p.clone();
                        kalman::predict(
                            &mut z,
                            &mut cov,
                            get(&lin.a, i),
                            get(&lin.f, i),
                            get(&lin.q, i),
                        );
                        (RbParticle { xi, z, p: cov }, xi_cov)
                    })
                    .collect::<Vec<_>>();
                first_stage_weights(&self.model, strategy, &predicted, y, t + 1).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Ancestor's linear moments propagated along the reference's `ξ`
    fn conditional_particle(
        &self,
        ancestor: &RbParticle,
        reference: &RbParticle,
        u: Option<&M::Input>,
        t: usize,
    ) -> Result<RbParticle, FilterError> {
        let mut particle = ancestor.clone();
        let (nl, lin) = self.dynamics(std::slice::from_ref(ancestor), u, t)?;
        self.advance(&mut particle, reference.xi.clone(), &nl, &lin, 0)?;
        Ok(particle)
    }
}

impl<M: MixedNlGaussian> Smoothing for RaoBlackwellized<M> {
    /// Density of `[ξ'; z']` with `z'` taken as a point value
    fn logp_xnext(
        &self,
        particles: &[RbParticle],
        next: &RbParticle,
        u: Option<&M::Input>,
        t: usize,
    ) -> Result<Vec<f64>, FilterError> {
        let (nl, lin) = self.dynamics(particles, u, t)?;
        let x = next.state();
        particles
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (mean, cov) = self.joint_moments(p, &nl, &lin, i);
                log_gaussian_pdf(&x, &mean, &cov)
            })
            .collect()
    }

    /// Highest peak of the per-particle transition densities
    fn logp_xnext_max(
        &self,
        particles: &[RbParticle],
        u: Option<&M::Input>,
        t: usize,
    ) -> Result<Option<f64>, FilterError> {
        let (nl, lin) = self.dynamics(particles, u, t)?;
        let mut bound = f64::NEG_INFINITY;
        for (i, p) in particles.iter().enumerate() {
            let (_, cov) = self.joint_moments(p, &nl, &lin, i);
            bound = bound.max(log_gaussian_peak(&cov)?);
        }
        Ok(Some(bound))
    }

    /// Condition `z_t` on the sampled future `[ξ_{t+1}; z_{t+1}]`, then draw
    /// a point value
    fn sample_smooth<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        particle: &RbParticle,
        future: Option<&RbParticle>,
        u: Option<&M::Input>,
        t: usize,
    ) -> Result<RbParticle, FilterError> {
        let mut z = particle.z.clone();
        let mut p = particle.p.clone();
        if let Some(future) = future {
            let (nl, lin) = self.dynamics(std::slice::from_ref(particle), u, t)?;
            let (c, offset, noise) = self.stacked_transition(&nl, &lin, 0);
            kalman::update(&mut z, &mut p, &future.state(), &c, Some(&offset), &noise)?;
        }
        let nz = z.len();
        Ok(RbParticle {
            xi: particle.xi.clone(),
            z: sample_gaussian_psd(rng, &z, &p),
            p: DMatrix::zeros(nz, nz),
        })
    }
}

impl<M: MixedParameters> ParameterEstimation for RaoBlackwellized<M> {
    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), FilterError> {
        self.model.set_params(params)
    }

    fn params(&self) -> DVector<f64> {
        self.model.params()
    }

    fn param_bounds(&self) -> Vec<(Option<f64>, Option<f64>)> {
        self.model.param_bounds()
    }

    /// `log p(ξ_0) + log N(z_0; z̄_0, P_0)` averaged over the draws
    fn eval_logp_x0(&self, particles: &[RbParticle], _t: usize) -> Result<f64, FilterError> {
        if particles.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for p in particles {
            total += self.model.logp_xi0(&p.xi)?;
            total += log_gaussian_pdf(&p.z, self.model.z0(), self.model.p0())?;
        }
        Ok(total / particles.len() as f64)
    }
}
