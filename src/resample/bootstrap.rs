//! Percentile bootstrap.
//!
//! Resamples observations with replacement (same size as the original),
//! refits the statistic, and reports the central percentile interval.

use rand::Rng;
use serde::Serialize;

use crate::stats;

use super::error::{ResampleError, ResampleResult};
use super::rng::run_trials;

/// Result of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapOutcome {
    pub observed_statistic: f64,
    /// Refit statistics in trial order, degenerate resamples left out.
    pub distribution: Vec<f64>,
    pub trials: usize,
    pub failed_trials: usize,
    pub confidence: f64,
    pub lower: f64,
    pub upper: f64,
    /// Standard deviation of the bootstrap distribution.
    pub std_error: f64,
}

impl BootstrapOutcome {
    /// Whether `value` (e.g. a theoretical constant) lies inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Bootstrap a statistic over `observations`.
///
/// `statistic` returns `None` on degenerate resamples (e.g. every drawn `x`
/// equal when fitting a slope); those trials are counted, not fabricated.
pub fn bootstrap<T, F>(
    observations: &[T],
    statistic: F,
    trials: usize,
    seed: u64,
    confidence: f64,
    parallel: bool,
) -> ResampleResult<BootstrapOutcome>
where
    T: Clone + Send + Sync,
    F: Fn(&[T]) -> Option<f64> + Sync,
{
    if observations.is_empty() {
        return Err(ResampleError::EmptySample);
    }
    if trials == 0 || !(confidence > 0.0 && confidence < 1.0) {
        return Err(ResampleError::InvalidConfig {
            message: format!("bootstrap needs trials >= 1 and 0 < confidence < 1 (got {trials}, {confidence})"),
        });
    }

    let observed = statistic(observations).ok_or_else(|| ResampleError::UndefinedStatistic {
        message: "bootstrap observed statistic".into(),
    })?;

    let n = observations.len();
    let draws: Vec<Option<f64>> = run_trials(trials, seed, parallel, |rng| {
        let sample: Vec<T> = (0..n)
            .map(|_| observations[rng.gen_range(0..n)].clone())
            .collect();
        statistic(&sample).filter(|s| !s.is_nan())
    });

    let distribution: Vec<f64> = draws.iter().flatten().copied().collect();
    let failed_trials = trials - distribution.len();
    if distribution.is_empty() {
        return Err(ResampleError::UndefinedStatistic {
            message: "statistic undefined on every bootstrap resample".into(),
        });
    }

    let mut sorted = distribution.clone();
    sorted.sort_by(f64::total_cmp);
    let alpha = 1.0 - confidence;
    let lower = stats::percentile(&sorted, alpha / 2.0).unwrap_or(observed);
    let upper = stats::percentile(&sorted, 1.0 - alpha / 2.0).unwrap_or(observed);
    let std_error = stats::std_dev(&distribution).unwrap_or(0.0);

    tracing::debug!(observed, lower, upper, failed_trials, "bootstrap complete");

    Ok(BootstrapOutcome {
        observed_statistic: observed,
        distribution,
        trials,
        failed_trials,
        confidence,
        lower,
        upper,
        std_error,
    })
}
