//! Observation sequences, stored forward trajectories and smoothed ensembles.

use super::cloud::ParticleCloud;
use crate::filter::errors::FilterError;

/// Data attached to one step of the filter
#[derive(Debug, Clone)]
pub struct StepData<U, Y> {
    /// Time index handed to the model
    pub t: usize,
    /// Observation applied at this step (`None` = no observation)
    pub y: Option<Y>,
    /// Input used to propagate out of this step
    pub u: Option<U>,
}

/// Pre-supplied observation sequence, aligned to filter steps
///
/// Two alignments are supported. With [`Observations::new`] the first
/// observation is applied to the initial particle cloud, so there are as
/// many steps as observations. With [`Observations::with_initial_step`] the
/// initial cloud is left unweighted and observation `k` is applied after the
/// `k`-th propagation, giving one extra step.
#[derive(Debug, Clone)]
pub struct Observations<U, Y> {
    steps: Vec<StepData<U, Y>>,
}

impl<U, Y> Observations<U, Y> {
    /// Step `k` observes `y[k]`
    pub fn new(y: Vec<Option<Y>>) -> Self {
        let steps = y
            .into_iter()
            .enumerate()
            .map(|(t, y)| StepData { t, y, u: None })
            .collect();
        Self { steps }
    }

    /// Step 0 is unobserved, step `k >= 1` observes `y[k - 1]`
    pub fn with_initial_step(y: Vec<Option<Y>>) -> Self {
        let mut steps = Vec::with_capacity(y.len() + 1);
        steps.push(StepData {
            t: 0,
            y: None,
            u: None,
        });
        steps.extend(y.into_iter().enumerate().map(|(k, y)| StepData {
            t: k + 1,
            y,
            u: None,
        }));
        Self { steps }
    }

    /// Attach inputs; `u[k]` drives the propagation out of step `k`.
    ///
    /// # Errors
    /// `DimensionMismatch` if there are fewer inputs than propagations.
    pub fn with_inputs(mut self, u: Vec<U>) -> Result<Self, FilterError> {
        let needed = self.steps.len().saturating_sub(1);
        if u.len() < needed {
            return Err(FilterError::DimensionMismatch {
                expected: needed,
                actual: u.len(),
                context: "input sequence".to_string(),
            });
        }
        for (step, u) in self.steps.iter_mut().zip(u) {
            step.u = Some(u);
        }
        Ok(self)
    }

    /// Number of filter steps
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if there are no steps
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Data for step `k`
    #[inline]
    pub fn step(&self, k: usize) -> &StepData<U, Y> {
        &self.steps[k]
    }

    /// Observation at step `k`
    #[inline]
    pub fn y(&self, k: usize) -> Option<&Y> {
        self.steps[k].y.as_ref()
    }

    /// Input out of step `k`
    #[inline]
    pub fn u(&self, k: usize) -> Option<&U> {
        self.steps[k].u.as_ref()
    }

    /// Time index of step `k`
    #[inline]
    pub fn t(&self, k: usize) -> usize {
        self.steps[k].t
    }

    /// Iterate over all steps
    pub fn iter(&self) -> impl Iterator<Item = &StepData<U, Y>> {
        self.steps.iter()
    }
}

/// Stored output of a forward filter pass
///
/// One cloud per step, append-only while filtering and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Trajectory<P> {
    clouds: Vec<ParticleCloud<P>>,
}

impl<P> Default for Trajectory<P> {
    fn default() -> Self {
        Self { clouds: Vec::new() }
    }
}

impl<P> Trajectory<P> {
    /// Empty trajectory
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the cloud for the next step
    pub fn push(&mut self, cloud: ParticleCloud<P>) {
        self.clouds.push(cloud);
    }

    /// Number of stored steps
    #[inline]
    pub fn len(&self) -> usize {
        self.clouds.len()
    }

    /// True if nothing has been stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clouds.is_empty()
    }

    /// Cloud at step `k`
    #[inline]
    pub fn cloud(&self, k: usize) -> &ParticleCloud<P> {
        &self.clouds[k]
    }

    /// Most recent cloud
    pub fn last(&self) -> Option<&ParticleCloud<P>> {
        self.clouds.last()
    }

    /// All clouds in time order
    pub fn clouds(&self) -> &[ParticleCloud<P>] {
        &self.clouds
    }

    /// Filtered (weighted) mean of a scalar feature at every step
    pub fn filtered_mean<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&P) -> f64,
    {
        self.clouds.iter().map(|c| c.weighted_mean(&f)).collect()
    }

    /// Smallest effective sample size over the stored steps
    pub fn min_ess(&self) -> f64 {
        self.clouds
            .iter()
            .map(|c| c.ess())
            .fold(f64::INFINITY, f64::min)
    }
}

/// Ensemble of `M` backward-sampled state sequences
///
/// Stored time-major: `states[t][j]` is the state of draw `j` at step `t`.
#[derive(Debug, Clone)]
pub struct SmoothedTrajectory<P> {
    states: Vec<Vec<P>>,
}

impl<P> SmoothedTrajectory<P> {
    /// Build from time-major states
    ///
    /// # Errors
    /// `DimensionMismatch` if the steps hold different numbers of draws.
    pub fn from_time_major(states: Vec<Vec<P>>) -> Result<Self, FilterError> {
        if let Some(first) = states.first() {
            let m = first.len();
            if let Some(bad) = states.iter().find(|s| s.len() != m) {
                return Err(FilterError::DimensionMismatch {
                    expected: m,
                    actual: bad.len(),
                    context: "smoothed trajectory draws".to_string(),
                });
            }
        }
        Ok(Self { states })
    }

    /// Number of steps
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if no steps are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of draws `M`
    pub fn ancestor_count(&self) -> usize {
        self.states.first().map_or(0, |s| s.len())
    }

    /// States of every draw at step `t`
    #[inline]
    pub fn at(&self, t: usize) -> &[P] {
        &self.states[t]
    }

    /// Iterate over steps
    pub fn steps(&self) -> impl Iterator<Item = &[P]> {
        self.states.iter().map(|s| s.as_slice())
    }

    /// Full path of draw `j`
    pub fn path(&self, j: usize) -> impl Iterator<Item = &P> {
        self.states.iter().map(move |s| &s[j])
    }

    /// Draw `j` as an owned single-draw ensemble
    pub fn single(&self, j: usize) -> SmoothedTrajectory<P>
    where
        P: Clone,
    {
        SmoothedTrajectory {
            states: self.states.iter().map(|s| vec![s[j].clone()]).collect(),
        }
    }

    /// Mean over draws of a scalar feature at every step
    pub fn mean<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&P) -> f64,
    {
        self.states
            .iter()
            .map(|s| s.iter().map(&f).sum::<f64>() / s.len().max(1) as f64)
            .collect()
    }
}
