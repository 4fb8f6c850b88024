//! Resampling-based significance and stability checks.
//!
//! - [`permutation_test`]: empirical p-value of an observed statistic under
//!   a shuffled-association null.
//! - [`bootstrap`]: percentile confidence interval of a refit statistic.
//! - [`leave_one_out`]: predictive error with every free parameter refit on
//!   the training fold, and the resulting generalization ratio.
//!
//! Every trial draws from its own seeded stream, so results are identical
//! whether trials run sequentially or on the rayon pool.

pub mod bootstrap;
pub mod error;
pub mod loo;
pub mod permutation;
pub mod rng;

use serde::{Deserialize, Serialize};

pub use bootstrap::{BootstrapOutcome, bootstrap};
pub use error::{ResampleError, ResampleResult};
pub use loo::{
    FnModel, FoldModel, LinearModel, LooOutcome, MeanModel, PolynomialModel, SkippedFold,
    generalization_ratio, leave_one_out,
};
pub use permutation::{PermutationOutcome, Tail, permutation_test};

/// Harness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    /// Permutation / bootstrap trial count (default: 10,000).
    pub trials: usize,
    /// Run-level seed (default: 0).
    pub seed: u64,
    /// Bootstrap interval coverage (default: 0.95).
    pub confidence: f64,
    /// Fewest training observations a LOO fold may fit on (default: 2).
    pub min_training_size: usize,
    /// Run trials on the rayon pool (default: true).
    pub parallel: bool,
    /// Permutation test direction (default: upper).
    pub tail: Tail,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            seed: 0,
            confidence: 0.95,
            min_training_size: 2,
            parallel: true,
            tail: Tail::Upper,
        }
    }
}

impl ResamplingConfig {
    pub fn validate(&self) -> ResampleResult<()> {
        if self.trials == 0 {
            return Err(ResampleError::InvalidConfig {
                message: "trials must be >= 1".into(),
            });
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ResampleError::InvalidConfig {
                message: format!("confidence must lie in (0, 1), got {}", self.confidence),
            });
        }
        Ok(())
    }
}

/// Any harness result, tagged for the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum ResamplingOutcome {
    Permutation(PermutationOutcome),
    Bootstrap(BootstrapOutcome),
    LeaveOneOut(LooOutcome),
}

impl ResamplingOutcome {
    pub fn observed_statistic(&self) -> Option<f64> {
        match self {
            Self::Permutation(p) => Some(p.observed_statistic),
            Self::Bootstrap(b) => Some(b.observed_statistic),
            Self::LeaveOneOut(_) => None,
        }
    }

    pub fn empirical_p_value(&self) -> Option<f64> {
        match self {
            Self::Permutation(p) => Some(p.empirical_p_value),
            _ => None,
        }
    }

    pub fn generalization_ratio(&self) -> Option<f64> {
        match self {
            Self::LeaveOneOut(l) => Some(l.generalization_ratio),
            _ => None,
        }
    }
}

/// Runs the three checks with one shared configuration.
#[derive(Debug, Clone, Default)]
pub struct ResamplingHarness {
    config: ResamplingConfig,
}

impl ResamplingHarness {
    pub fn new(config: ResamplingConfig) -> ResampleResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ResamplingConfig {
        &self.config
    }

    /// Permutation test with the configured trials, seed, tail and parallelism.
    pub fn permutation<T, D, F>(
        &self,
        independent: &[T],
        dependent: &[D],
        statistic: F,
    ) -> ResampleResult<PermutationOutcome>
    where
        T: Clone + Send + Sync,
        D: Sync,
        F: Fn(&[T], &[D]) -> Option<f64> + Sync,
    {
        let c = &self.config;
        permutation_test(independent, dependent, statistic, c.trials, c.seed, c.tail, c.parallel)
    }

    pub fn bootstrap<T, F>(&self, observations: &[T], statistic: F) -> ResampleResult<BootstrapOutcome>
    where
        T: Clone + Send + Sync,
        F: Fn(&[T]) -> Option<f64> + Sync,
    {
        let c = &self.config;
        bootstrap(observations, statistic, c.trials, c.seed, c.confidence, c.parallel)
    }

    pub fn leave_one_out<T, M>(&self, model: &M, observations: &[T]) -> ResampleResult<LooOutcome>
    where
        T: Clone,
        M: FoldModel<T>,
    {
        leave_one_out(model, observations, self.config.min_training_size)
    }
}
