//! Backward smoothers against the Rauch-Tung-Striebel reference

mod helpers;

use nalgebra::DVector;
use rbsmc::models::dataset::simulate_linear_gaussian;
use rbsmc::models::LinearGaussian1d;
use rbsmc::paramest::{filter, simulate};
use rbsmc::reporter::{DebugReporter, EstimationWarning};
use rbsmc::{smooth, FilterConfig, NoOpReporter, Observations, SimpleRng, SmootherMode};
use helpers::{as_vectors, random_walk_reference, rmse};

const Q: f64 = 1.0;
const R: f64 = 0.1;
const P0: f64 = 5.0;

fn scalar_setup(seed: u64, steps: usize) -> (LinearGaussian1d, Observations<(), f64>, Vec<Option<f64>>) {
    let data = simulate_linear_gaussian(&mut SimpleRng::new(seed), steps, Q, R, P0);
    let obs = Observations::new(data.y.clone());
    (LinearGaussian1d::new(Q, R, P0), obs, data.y)
}

/// Test that FFBSi recovers the smoothed mean
#[test]
fn test_ffbsi_matches_rts() {
    let (model, obs, ys) = scalar_setup(42, 40);
    let reference = random_walk_reference(&ys, Q, R, P0);

    let config = FilterConfig::new(300, 100).with_smoother_mode(SmootherMode::Full);
    let result = simulate(&model, &mut SimpleRng::new(1), &obs, &config, None, &mut NoOpReporter).unwrap();
    let smoothed = result.smoothed.unwrap();
    assert_eq!(smoothed.len(), 40);
    assert_eq!(smoothed.ancestor_count(), 100);

    let error = rmse(&smoothed.mean(|x| *x), &reference.smoothed_mean);
    assert!(error < 0.1, "FFBSi RMSE {} too large", error);
}

/// Test that rejection-sampling FFBSi agrees with the exact smoother
#[test]
fn test_rejection_sampling_matches_rts() {
    let (model, obs, ys) = scalar_setup(43, 40);
    let reference = random_walk_reference(&ys, Q, R, P0);

    let config = FilterConfig::new(300, 100).with_smoother_mode(SmootherMode::rejection());
    let mut reporter = DebugReporter::new();
    let result = simulate(&model, &mut SimpleRng::new(2), &obs, &config, None, &mut reporter).unwrap();
    let smoothed = result.smoothed.unwrap();

    let error = rmse(&smoothed.mean(|x| *x), &reference.smoothed_mean);
    assert!(error < 0.1, "rejection FFBSi RMSE {} too large", error);
    assert_eq!(reporter.smoothing_passes().len(), 1);
    assert_eq!(reporter.smoothing_passes()[0].draws, 100);
}

/// Test that a tight attempt cap falls back to exact draws and says so
#[test]
fn test_rejection_fallback_is_reported() {
    let (model, obs, ys) = scalar_setup(44, 40);
    let reference = random_walk_reference(&ys, Q, R, P0);

    let config = FilterConfig::new(200, 50)
        .with_smoother_mode(SmootherMode::RejectionSampling { max_attempts: 1 });
    let mut reporter = DebugReporter::new();
    let result = simulate(&model, &mut SimpleRng::new(3), &obs, &config, None, &mut reporter).unwrap();

    let fallbacks = reporter.smoothing_passes()[0].rejection_fallbacks;
    assert!(fallbacks > 0, "expected some proposals to be rejected");
    assert!(reporter
        .warnings()
        .iter()
        .any(|w| matches!(w, EstimationWarning::RejectionFallback { count } if *count == fallbacks)));

    // Fallback draws are exact, so the estimate is unaffected
    let error = rmse(&result.smoothed.unwrap().mean(|x| *x), &reference.smoothed_mean);
    assert!(error < 0.15, "RMSE {} too large", error);
}

/// Test that ancestral paths follow the recorded parent indices
#[test]
fn test_ancestor_paths_follow_lineage() {
    let (model, obs, _) = scalar_setup(45, 25);
    let mut rng = SimpleRng::new(4);
    let traj = filter(&model, &mut rng, &obs, &FilterConfig::new(100, 1), &mut NoOpReporter).unwrap();
    let smoothed = smooth(&model, &mut rng, &traj, &obs, SmootherMode::Ancestor, 20, &mut NoOpReporter)
        .unwrap();

    for j in 0..20 {
        let path: Vec<f64> = smoothed.path(j).cloned().collect();
        assert_eq!(path.len(), 25);
        for k in (0..24).rev() {
            let next = traj.cloud(k + 1);
            let i = next
                .particles
                .iter()
                .position(|x| *x == path[k + 1])
                .expect("path state missing from its cloud");
            let parent = traj.cloud(k).particles[next.ancestors[i]];
            assert_eq!(parent, path[k], "path {} breaks lineage at step {}", j, k);
        }
    }
}

/// Test that a fixed seed gives identical smoothed trajectories
#[test]
fn test_same_seed_same_trajectories() {
    let (model, obs, _) = scalar_setup(46, 30);
    let config = FilterConfig::new(100, 20).with_smoother_mode(SmootherMode::Full);

    let a = simulate(&model, &mut SimpleRng::new(77), &obs, &config, None, &mut NoOpReporter)
        .unwrap()
        .smoothed
        .unwrap();
    let b = simulate(&model, &mut SimpleRng::new(77), &obs, &config, None, &mut NoOpReporter)
        .unwrap()
        .smoothed
        .unwrap();
    for k in 0..30 {
        assert_eq!(a.at(k), b.at(k), "trajectories differ at step {}", k);
    }

    let c = simulate(&model, &mut SimpleRng::new(78), &obs, &config, None, &mut NoOpReporter)
        .unwrap()
        .smoothed
        .unwrap();
    assert_ne!(a.at(0), c.at(0));
}

/// Test that smoothing the Rao-Blackwellized linear model reproduces RTS
#[test]
fn test_rb_smoother_matches_rts() {
    let (model, _, ys) = scalar_setup(47, 30);
    let reference = random_walk_reference(&ys, Q, R, P0);

    let rb = model.rao_blackwellized();
    let obs: Observations<(), DVector<f64>> = Observations::new(as_vectors(&ys));
    let config = FilterConfig::new(10, 300).with_smoother_mode(SmootherMode::Full);
    let result = simulate(&rb, &mut SimpleRng::new(5), &obs, &config, None, &mut NoOpReporter).unwrap();
    let smoothed = result.smoothed.unwrap();

    let means = smoothed.mean(|p| p.z[0]);
    let error = rmse(&means, &reference.smoothed_mean);
    assert!(error < 0.1, "RB smoother RMSE {} too large", error);
    // Every smoothed draw is a point value
    assert!(smoothed.at(0).iter().all(|p| p.p[(0, 0)] == 0.0));
}

/// Test that smoothing without a mode is rejected
#[test]
fn test_smooth_requires_mode() {
    let (model, obs, _) = scalar_setup(48, 10);
    let mut rng = SimpleRng::new(6);
    let traj = filter(&model, &mut rng, &obs, &FilterConfig::new(20, 1), &mut NoOpReporter).unwrap();
    assert!(smooth(&model, &mut rng, &traj, &obs, SmootherMode::None, 5, &mut NoOpReporter).is_err());
}
