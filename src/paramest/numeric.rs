//! Bounded numeric M-step
//!
//! Maximises `Q(θ)` from the accumulator with argmin's Nelder-Mead over an
//! unconstrained reparameterisation of the bounds:
//!
//! | bounds      | map `φ → θ`                      |
//! |-------------|----------------------------------|
//! | none        | `θ = φ`                          |
//! | `[l, ∞)`    | `θ = l + softplus(φ)`            |
//! | `(-∞, u]`   | `θ = u - softplus(φ)`            |
//! | `[l, u]`    | `θ = l + (u - l) · logistic(φ)`  |
//!
//! The search is capped at a few iterations per outer PSAEM step; reaching
//! the cap is not an error and the best point found is kept.

use std::cell::RefCell;

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use nalgebra::DVector;
use serde::Serialize;

use super::accumulator::SufficientStatisticAccumulator;
use crate::common::constants::SIMPLEX_SPREAD;
use crate::filter::errors::{FilterError, OptimizerError};
use crate::model::traits::ParameterEstimation;
use crate::types::Observations;

/// Result of one M-step
#[derive(Debug, Clone, Serialize)]
pub struct MStepOutcome {
    /// Parameters the model was left at
    pub params: DVector<f64>,
    /// `Q(θ)` at those parameters
    pub q_value: f64,
    /// Whether the solver reported convergence (always true for closed forms)
    pub converged: bool,
    /// Solver iterations used
    pub iterations: u64,
}

// ============================================================================
// Reparameterisation
// ============================================================================

/// Elementwise bijection between `R^d` and the box given by the bounds
#[derive(Debug, Clone)]
pub struct BoundTransform {
    bounds: Vec<(Option<f64>, Option<f64>)>,
}

fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

fn softplus_inv(v: f64) -> f64 {
    if v > 30.0 {
        v
    } else {
        v + (-(-v).exp_m1()).ln()
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl BoundTransform {
    /// Check the bounds against a parameter vector of dimension `dim`
    pub fn new(bounds: Vec<(Option<f64>, Option<f64>)>, dim: usize) -> Result<Self, OptimizerError> {
        if bounds.len() != dim {
            return Err(OptimizerError::InvalidBounds {
                description: format!("{} bounds for {} parameters", bounds.len(), dim),
            });
        }
        for (i, b) in bounds.iter().enumerate() {
            let finite = b.0.map_or(true, f64::is_finite) && b.1.map_or(true, f64::is_finite);
            if !finite {
                return Err(OptimizerError::InvalidBounds {
                    description: format!("bound of parameter {} is not finite", i),
                });
            }
            if let (Some(l), Some(u)) = *b {
                if l >= u {
                    return Err(OptimizerError::InvalidBounds {
                        description: format!("parameter {}: lower {} >= upper {}", i, l, u),
                    });
                }
            }
        }
        Ok(Self { bounds })
    }

    /// Unconstrained coordinates → parameters
    pub fn to_params(&self, phi: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            phi.len(),
            phi.iter().zip(&self.bounds).map(|(&x, b)| match *b {
                (None, None) => x,
                (Some(l), None) => l + softplus(x),
                (None, Some(u)) => u - softplus(x),
                (Some(l), Some(u)) => l + (u - l) * logistic(x),
            }),
        )
    }

    /// Parameters → unconstrained coordinates
    ///
    /// Points on or outside a bound are pulled just inside it first.
    pub fn to_unconstrained(&self, theta: &DVector<f64>) -> Vec<f64> {
        theta
            .iter()
            .zip(&self.bounds)
            .map(|(&v, b)| match *b {
                (None, None) => v,
                (Some(l), None) => softplus_inv(inside(v - l, l)),
                (None, Some(u)) => softplus_inv(inside(u - v, u)),
                (Some(l), Some(u)) => {
                    let s = ((v - l) / (u - l)).clamp(1e-9, 1.0 - 1e-9);
                    (s / (1.0 - s)).ln()
                }
            })
            .collect()
    }
}

fn inside(gap: f64, anchor: f64) -> f64 {
    gap.max(1e-9 * anchor.abs().max(1.0))
}

// ============================================================================
// Objective
// ============================================================================

struct NegativeQ<'a, M: ParameterEstimation> {
    model: RefCell<&'a mut M>,
    stats: &'a SufficientStatisticAccumulator<M::Particle>,
    obs: &'a Observations<M::Input, M::Measurement>,
    transform: &'a BoundTransform,
}

impl<M: ParameterEstimation> NegativeQ<'_, M> {
    fn q_at(&self, phi: &[f64]) -> Result<f64, FilterError> {
        let theta = self.transform.to_params(phi);
        let mut model = self.model.borrow_mut();
        model.set_params(&theta)?;
        self.stats.expected_log_likelihood(&**model, self.obs)
    }
}

impl<M: ParameterEstimation> CostFunction for NegativeQ<'_, M> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, phi: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let q = self.q_at(phi)?;
        // Nelder-Mead treats a huge cost as a rejected vertex
        Ok(if q.is_finite() { -q } else { f64::MAX })
    }
}

// ============================================================================
// M-step
// ============================================================================

/// Maximise `Q(θ)` numerically, starting from the model's current
/// parameters, and leave the model at the best point found
///
/// # Errors
/// `InvalidBounds` when `param_bounds` does not fit `params`,
/// `NonFiniteStart` when `Q` is not finite at the start, `Solver` for any
/// solver failure. Running out of iterations is only logged.
pub fn maximize_numeric<M: ParameterEstimation>(
    model: &mut M,
    stats: &SufficientStatisticAccumulator<M::Particle>,
    obs: &Observations<M::Input, M::Measurement>,
    max_iter: u64,
) -> Result<MStepOutcome, FilterError> {
    let start = model.params();
    let transform = BoundTransform::new(model.param_bounds(), start.len())?;
    let phi0 = transform.to_unconstrained(&start);

    let problem = NegativeQ {
        model: RefCell::new(&mut *model),
        stats,
        obs,
        transform: &transform,
    };
    let q0 = problem.q_at(&phi0)?;
    if !q0.is_finite() {
        return Err(OptimizerError::NonFiniteStart { value: q0 }.into());
    }

    // Initial simplex: the start plus one perturbed vertex per coordinate
    let mut simplex = vec![phi0.clone()];
    for i in 0..phi0.len() {
        let mut vertex = phi0.clone();
        vertex[i] += SIMPLEX_SPREAD;
        simplex.push(vertex);
    }
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-8)
        .map_err(solver_error)?;

    let (phi_best, neg_q, iterations, status) = {
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iter))
            .run()
            .map_err(solver_error)?;
        let state = result.state();
        let (phi_best, neg_q) = match state.get_best_param() {
            Some(p) => (p.clone(), state.get_best_cost()),
            None => (phi0, -q0),
        };
        (phi_best, neg_q, state.get_iter(), state.get_termination_status().clone())
    };
    let converged = matches!(
        status,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );

    let params = transform.to_params(&phi_best);
    model.set_params(&params)?;
    if !converged {
        log::warn!(
            "Numeric M-step stopped after {} iterations without converging ({:?})",
            iterations,
            status
        );
    }
    Ok(MStepOutcome {
        params,
        q_value: -neg_q,
        converged,
        iterations,
    })
}

fn solver_error(e: argmin::core::Error) -> FilterError {
    match e.downcast::<FilterError>() {
        Ok(inner) => inner,
        Err(e) => OptimizerError::Solver {
            message: e.to_string(),
        }
        .into(),
    }
}
