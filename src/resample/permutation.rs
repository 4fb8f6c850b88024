//! Permutation test.
//!
//! Shuffles a copy of the independent variable while the dependent variable
//! stays fixed, recomputes the statistic, and counts null trials at least
//! as extreme as the observed value.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::stats;

use super::error::{ResampleError, ResampleResult};
use super::rng::run_trials;

/// Which direction counts as "at least as extreme".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    /// `s >= observed` (R², correlation, odds ratio).
    #[default]
    Upper,
    /// `s <= observed` (MAE and other error measures).
    Lower,
    /// `|s| >= |observed|`, for statistics centred on zero.
    TwoSided,
}

impl Tail {
    fn is_extreme(self, null: f64, observed: f64) -> bool {
        // Absorb summation-order noise between equivalent permutations.
        let tol = 1e-12 * observed.abs().max(1.0);
        match self {
            Self::Upper => null >= observed - tol,
            Self::Lower => null <= observed + tol,
            Self::TwoSided => null.abs() >= observed.abs() - tol,
        }
    }
}

/// Result of a permutation test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermutationOutcome {
    pub observed_statistic: f64,
    /// One slot per trial, in trial order. `None` where the statistic was
    /// undefined on that permutation (also counted in `failed_trials`).
    pub null_distribution: Vec<Option<f64>>,
    /// Extreme null trials / all trials. A failed trial is never extreme.
    pub empirical_p_value: f64,
    pub tail: Tail,
    pub trials: usize,
    pub failed_trials: usize,
    pub null_mean: f64,
    pub null_std: f64,
    pub z_score: f64,
}

impl PermutationOutcome {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.empirical_p_value < alpha
    }
}

/// Run a permutation test.
///
/// `statistic` receives the (possibly shuffled) independent values and the
/// fixed dependent values and returns `None` when undefined.
pub fn permutation_test<T, D, F>(
    independent: &[T],
    dependent: &[D],
    statistic: F,
    trials: usize,
    seed: u64,
    tail: Tail,
    parallel: bool,
) -> ResampleResult<PermutationOutcome>
where
    T: Clone + Send + Sync,
    D: Sync,
    F: Fn(&[T], &[D]) -> Option<f64> + Sync,
{
    if independent.len() != dependent.len() {
        return Err(ResampleError::LengthMismatch {
            independent: independent.len(),
            dependent: dependent.len(),
        });
    }
    if independent.is_empty() {
        return Err(ResampleError::EmptySample);
    }
    if trials == 0 {
        return Err(ResampleError::InvalidConfig {
            message: "permutation test needs at least one trial".into(),
        });
    }

    let observed =
        statistic(independent, dependent).ok_or_else(|| ResampleError::UndefinedStatistic {
            message: "permutation test observed statistic".into(),
        })?;

    let null_distribution: Vec<Option<f64>> = run_trials(trials, seed, parallel, |rng| {
        let mut shuffled = independent.to_vec();
        shuffled.shuffle(rng);
        statistic(&shuffled, dependent).filter(|s| !s.is_nan())
    });

    let valid: Vec<f64> = null_distribution.iter().flatten().copied().collect();
    let failed_trials = trials - valid.len();
    if valid.is_empty() {
        return Err(ResampleError::UndefinedStatistic {
            message: "statistic undefined on every permutation".into(),
        });
    }

    let extreme = valid.iter().filter(|&&s| tail.is_extreme(s, observed)).count();
    let empirical_p_value = extreme as f64 / trials as f64;

    let null_mean = stats::mean(&valid).unwrap_or(0.0);
    let null_std = stats::std_dev(&valid).unwrap_or(0.0);
    let z_score = if null_std > 0.0 {
        (observed - null_mean) / null_std
    } else {
        0.0
    };

    tracing::debug!(
        observed,
        p = empirical_p_value,
        trials,
        failed_trials,
        "permutation test complete"
    );

    Ok(PermutationOutcome {
        observed_statistic: observed,
        null_distribution,
        empirical_p_value,
        tail,
        trials,
        failed_trials,
        null_mean,
        null_std,
        z_score,
    })
}
