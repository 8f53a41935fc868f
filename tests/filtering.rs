//! Forward filter accuracy against closed-form references

mod helpers;

use nalgebra::DVector;
use rbsmc::components::kalman_filter;
use rbsmc::model::LookAhead;
use rbsmc::models::dataset::{simulate_linear_gaussian, simulate_switching};
use rbsmc::models::{LinearGaussian1d, SwitchingLinear};
use rbsmc::paramest::filter;
use rbsmc::reporter::DebugReporter;
use rbsmc::{
    FilterConfig, FilterError, FilterMode, ForwardFilter, NoOpReporter, Observations,
    RaoBlackwellized, SimpleRng,
};
use helpers::{as_vectors, assert_normalized, assert_scalar_close, random_walk_reference, rmse};

const Q: f64 = 1.0;
const R: f64 = 0.1;
const P0: f64 = 5.0;

/// Test that the Rao-Blackwellized filter reproduces the Kalman filter when
/// the whole state is linear
#[test]
fn test_rb_linear_model_matches_kalman() {
    let data = simulate_linear_gaussian(&mut SimpleRng::new(42), 40, Q, R, P0);
    let model = LinearGaussian1d::new(Q, R, P0);
    let ys = as_vectors(&data.y);
    let reference = kalman_filter(&model.kalman_model(), &ys).unwrap();

    let rb = model.rao_blackwellized();
    let obs: Observations<(), DVector<f64>> = Observations::new(ys);
    let config = FilterConfig::new(20, 1);
    let traj = filter(&rb, &mut SimpleRng::new(1), &obs, &config, &mut NoOpReporter).unwrap();

    assert_eq!(traj.len(), 40);
    for k in 0..traj.len() {
        let cloud = traj.cloud(k);
        for p in &cloud.particles {
            assert_scalar_close(p.z[0], reference.means[k][0], 1e-9, &format!("mean at {}", k));
            assert_scalar_close(
                p.p[(0, 0)],
                reference.covariances[k][(0, 0)],
                1e-9,
                &format!("variance at {}", k),
            );
        }
        assert_normalized(&cloud.log_weights, &format!("weights at {}", k));
    }
}

/// Test the alignment where the first step carries no observation
#[test]
fn test_rb_linear_model_with_initial_step() {
    let data = simulate_linear_gaussian(&mut SimpleRng::new(7), 25, Q, R, P0);
    let model = LinearGaussian1d::new(Q, R, P0);
    let observed: Vec<Option<DVector<f64>>> = as_vectors(&data.y[1..]);

    let mut ys = vec![None];
    ys.extend(observed.iter().cloned());
    let reference = kalman_filter(&model.kalman_model(), &ys).unwrap();

    let obs: Observations<(), DVector<f64>> = Observations::with_initial_step(observed);
    assert_eq!(obs.len(), 25);
    assert!(obs.y(0).is_none());

    let rb = model.rao_blackwellized();
    let traj = filter(&rb, &mut SimpleRng::new(2), &obs, &FilterConfig::new(10, 1), &mut NoOpReporter)
        .unwrap();
    let means = traj.filtered_mean(|p| p.z[0]);
    let expected: Vec<f64> = reference.means.iter().map(|m| m[0]).collect();
    helpers::assert_series_close(&means, &expected, 1e-9, "filtered mean");
}

/// Test that the bootstrap filter tracks the Kalman mean
#[test]
fn test_particle_filter_tracks_kalman_mean() {
    let data = simulate_linear_gaussian(&mut SimpleRng::new(42), 50, Q, R, P0);
    let reference = random_walk_reference(&data.y, Q, R, P0);

    let model = LinearGaussian1d::new(Q, R, P0);
    let obs: Observations<(), f64> = Observations::new(data.y.clone());
    let mut reporter = DebugReporter::new();
    let traj = filter(&model, &mut SimpleRng::new(3), &obs, &FilterConfig::new(500, 1), &mut reporter)
        .unwrap();

    let means = traj.filtered_mean(|x| *x);
    let error = rmse(&means, &reference.filtered_mean);
    assert!(error < 0.1, "filter RMSE {} too large", error);

    assert_eq!(reporter.forward_steps().len(), 50);
    assert!(reporter.forward_steps().iter().all(|s| s.ess >= 1.0 && s.ess <= 500.0));
    for (k, cloud) in traj.clouds().iter().enumerate() {
        assert_eq!(cloud.len(), 500);
        assert_normalized(&cloud.log_weights, &format!("weights at {}", k));
    }
}

/// Test that missing observations leave the weights alone
#[test]
fn test_missing_observations_propagate_only() {
    let mut data = simulate_linear_gaussian(&mut SimpleRng::new(11), 30, Q, R, P0);
    for k in (5..30).step_by(3) {
        data.y[k] = None;
    }
    let reference = random_walk_reference(&data.y, Q, R, P0);

    let model = LinearGaussian1d::new(Q, R, P0);
    let obs: Observations<(), f64> = Observations::new(data.y.clone());
    let config = FilterConfig::new(500, 1).with_resample_threshold(0.0);
    let traj = filter(&model, &mut SimpleRng::new(4), &obs, &config, &mut NoOpReporter).unwrap();

    // Threshold zero disables resampling, so an unobserved step copies the
    // previous weights
    for k in (5..30).step_by(3) {
        let before = &traj.cloud(k - 1).log_weights;
        let after = &traj.cloud(k).log_weights;
        for (a, b) in after.iter().zip(before) {
            assert_scalar_close(*a, *b, 1e-9, &format!("weight at {}", k));
        }
    }

    // With resampling on, the estimate still follows the reference
    let traj = filter(&model, &mut SimpleRng::new(5), &obs, &FilterConfig::new(500, 1), &mut NoOpReporter)
        .unwrap();
    let error = rmse(&traj.filtered_mean(|x| *x), &reference.filtered_mean);
    assert!(error < 0.15, "filter RMSE {} too large", error);
}

/// Test that the auxiliary filter agrees with the bootstrap filter on a
/// model with both linear couplings
#[test]
fn test_auxiliary_filter_agrees_with_bootstrap() {
    let switching = SwitchingLinear::default();
    let data = simulate_switching(&mut SimpleRng::new(42), &switching, 30);
    let obs: Observations<(), DVector<f64>> = Observations::with_initial_step(data.y.clone());

    let bootstrap = RaoBlackwellized::new(switching.clone());
    let baseline = filter(&bootstrap, &mut SimpleRng::new(6), &obs, &FilterConfig::new(2000, 1), &mut NoOpReporter)
        .unwrap()
        .filtered_mean(|p| p.xi[0] * p.xi[0]);

    for look_ahead in [LookAhead::Extended, LookAhead::Unscented] {
        let apf = RaoBlackwellized::new(switching.clone()).with_look_ahead(look_ahead);
        let config = FilterConfig::new(1000, 1).with_filter_mode(FilterMode::Auxiliary);
        let traj = filter(&apf, &mut SimpleRng::new(7), &obs, &config, &mut NoOpReporter).unwrap();
        assert!(traj.clouds().iter().skip(1).all(|c| c.resampled));

        let estimate = traj.filtered_mean(|p| p.xi[0] * p.xi[0]);
        assert!(estimate.iter().all(|v| v.is_finite()));
        let error = rmse(&estimate, &baseline);
        assert!(error < 0.3, "{:?} look-ahead differs by RMSE {}", look_ahead, error);
    }
}

/// Test that the auxiliary filter needs first-stage weights
#[test]
fn test_auxiliary_filter_needs_look_ahead() {
    let rb = RaoBlackwellized::new(SwitchingLinear::default());
    let config = FilterConfig::new(10, 1).with_filter_mode(FilterMode::Auxiliary);
    match ForwardFilter::new(&rb, &config) {
        Err(FilterError::MissingCapability { .. }) => {}
        other => panic!("expected MissingCapability, got {:?}", other.map(|_| ())),
    }
}

/// Test that the conditional filter keeps the reference in the last slot
#[test]
fn test_conditional_filter_holds_reference() {
    let data = simulate_linear_gaussian(&mut SimpleRng::new(13), 20, Q, R, P0);
    let model = LinearGaussian1d::new(Q, R, P0);
    let obs: Observations<(), f64> = Observations::new(data.y.clone());
    let config = FilterConfig::new(50, 1).with_filter_mode(FilterMode::ConditionalAncestorSampling);
    let forward = ForwardFilter::new(&model, &config).unwrap();

    let traj = forward
        .run_conditional(&mut SimpleRng::new(8), &obs, &data.x, &mut NoOpReporter)
        .unwrap();
    for (k, cloud) in traj.clouds().iter().enumerate() {
        assert_eq!(cloud.particles[49], data.x[k], "reference moved at step {}", k);
        assert_normalized(&cloud.log_weights, &format!("weights at {}", k));
    }

    assert!(forward
        .run(&mut SimpleRng::new(9), &obs, &mut NoOpReporter)
        .is_err());
    assert!(forward
        .run_conditional(&mut SimpleRng::new(9), &obs, &data.x[..10], &mut NoOpReporter)
        .is_err());
}
