//! Leave-one-out cross-validation.
//!
//! Every fold refits the model from scratch on the training observations
//! only. Models whose fit includes a selection step (e.g. re-resolving
//! catalog records) must run that step inside [`FoldModel::fit`] so the
//! held-out observation never influences its own prediction. Because such
//! a selection also decides what the held-out observation is scored
//! against, [`FoldModel::observed`] sees the fold's fit too.

use serde::Serialize;

use crate::stats;

use super::error::{ResampleError, ResampleResult};

// ---------------------------------------------------------------------------
// Model trait
// ---------------------------------------------------------------------------

/// A model that can be fit on a subset of observations and predict another.
pub trait FoldModel<T> {
    type Fitted;

    /// Number of free parameters the fit estimates.
    fn free_parameters(&self) -> usize;

    /// Fewest training observations a fit can use.
    fn min_training_size(&self) -> usize {
        self.free_parameters()
    }

    /// Fit on `training`. `None` when the fit is undefined for this subset.
    fn fit(&self, training: &[T]) -> Option<Self::Fitted>;

    fn predict(&self, fitted: &Self::Fitted, observation: &T) -> f64;

    /// The observed value a prediction is scored against under `fitted`.
    /// `None` when the fit leaves the observation without one.
    fn observed(&self, fitted: &Self::Fitted, observation: &T) -> Option<f64>;
}

/// Constant model: predicts the training mean of `y`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanModel;

impl FoldModel<(f64, f64)> for MeanModel {
    type Fitted = f64;

    fn free_parameters(&self) -> usize {
        1
    }

    fn fit(&self, training: &[(f64, f64)]) -> Option<f64> {
        let ys: Vec<f64> = training.iter().map(|p| p.1).collect();
        stats::mean(&ys)
    }

    fn predict(&self, fitted: &f64, _observation: &(f64, f64)) -> f64 {
        *fitted
    }

    fn observed(&self, _fitted: &Self::Fitted, observation: &(f64, f64)) -> Option<f64> {
        Some(observation.1)
    }
}

/// Ordinary least-squares line through `(x, y)` points.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearModel;

impl FoldModel<(f64, f64)> for LinearModel {
    type Fitted = stats::LineFit;

    fn free_parameters(&self) -> usize {
        2
    }

    fn fit(&self, training: &[(f64, f64)]) -> Option<stats::LineFit> {
        let (x, y): (Vec<f64>, Vec<f64>) = training.iter().copied().unzip();
        stats::fit_line(&x, &y)
    }

    fn predict(&self, fitted: &stats::LineFit, observation: &(f64, f64)) -> f64 {
        fitted.predict(observation.0)
    }

    fn observed(&self, _fitted: &Self::Fitted, observation: &(f64, f64)) -> Option<f64> {
        Some(observation.1)
    }
}

/// Least-squares polynomial of fixed degree.
#[derive(Debug, Clone, Copy)]
pub struct PolynomialModel {
    pub degree: usize,
}

impl FoldModel<(f64, f64)> for PolynomialModel {
    type Fitted = Vec<f64>;

    fn free_parameters(&self) -> usize {
        self.degree + 1
    }

    fn fit(&self, training: &[(f64, f64)]) -> Option<Vec<f64>> {
        let (x, y): (Vec<f64>, Vec<f64>) = training.iter().copied().unzip();
        stats::fit_polynomial(&x, &y, self.degree)
    }

    fn predict(&self, fitted: &Vec<f64>, observation: &(f64, f64)) -> f64 {
        stats::eval_polynomial(fitted, observation.0)
    }

    fn observed(&self, _fitted: &Self::Fitted, observation: &(f64, f64)) -> Option<f64> {
        Some(observation.1)
    }
}

/// A model assembled from closures, for fits with custom stages.
pub struct FnModel<Fit, Pred, Obs> {
    free_parameters: usize,
    fit: Fit,
    predict: Pred,
    observed: Obs,
}

impl<Fit, Pred, Obs> FnModel<Fit, Pred, Obs> {
    pub fn new(free_parameters: usize, fit: Fit, predict: Pred, observed: Obs) -> Self {
        Self {
            free_parameters,
            fit,
            predict,
            observed,
        }
    }
}

impl<T, M, Fit, Pred, Obs> FoldModel<T> for FnModel<Fit, Pred, Obs>
where
    Fit: Fn(&[T]) -> Option<M>,
    Pred: Fn(&M, &T) -> f64,
    Obs: Fn(&M, &T) -> Option<f64>,
{
    type Fitted = M;

    fn free_parameters(&self) -> usize {
        self.free_parameters
    }

    fn fit(&self, training: &[T]) -> Option<M> {
        (self.fit)(training)
    }

    fn predict(&self, fitted: &M, observation: &T) -> f64 {
        (self.predict)(fitted, observation)
    }

    fn observed(&self, fitted: &M, observation: &T) -> Option<f64> {
        (self.observed)(fitted, observation)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// A fold that was not scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFold {
    pub index: usize,
    pub available: usize,
    pub required: usize,
    pub reason: String,
}

/// Result of leave-one-out cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooOutcome {
    /// Absolute error per held-out observation, `None` where the fold was skipped.
    pub per_held_out_error: Vec<Option<f64>>,
    pub skipped_folds: Vec<SkippedFold>,
    /// In-sample mean absolute error of the full-data fit.
    pub training_error: f64,
    /// Mean absolute error over scored folds.
    pub cv_error: f64,
    /// `cv_error / training_error`: near 1 generalizes, far above 1 overfits.
    pub generalization_ratio: f64,
    pub free_parameters: usize,
}

impl LooOutcome {
    pub fn scored_folds(&self) -> usize {
        self.per_held_out_error.iter().flatten().count()
    }
}

/// Ratio of cross-validated to training error, with the zero cases pinned.
pub fn generalization_ratio(cv_error: f64, training_error: f64) -> f64 {
    if training_error > 0.0 {
        cv_error / training_error
    } else if cv_error > 0.0 {
        f64::INFINITY
    } else {
        1.0
    }
}

fn residual<T, M: FoldModel<T>>(model: &M, fitted: &M::Fitted, observation: &T) -> Option<f64> {
    let observed = model.observed(fitted, observation)?;
    Some((observed - model.predict(fitted, observation)).abs())
}

/// Run leave-one-out cross-validation.
///
/// Folds whose training set is smaller than `max(min_training_size,
/// model.min_training_size())`, or whose fit is undefined, are skipped and
/// recorded.
pub fn leave_one_out<T, M>(
    model: &M,
    observations: &[T],
    min_training_size: usize,
) -> ResampleResult<LooOutcome>
where
    T: Clone,
    M: FoldModel<T>,
{
    let n = observations.len();
    let required = min_training_size.max(model.min_training_size());
    if n < required {
        return Err(ResampleError::InsufficientSample {
            available: n,
            required,
        });
    }

    let full = model
        .fit(observations)
        .ok_or_else(|| ResampleError::UndefinedStatistic {
            message: "model fit failed on the full sample".into(),
        })?;
    let in_sample: Vec<f64> = observations
        .iter()
        .filter_map(|o| residual(model, &full, o))
        .collect();
    let training_error = stats::mean(&in_sample).ok_or_else(|| ResampleError::UndefinedStatistic {
        message: "no observation has an observed value under the full-sample fit".into(),
    })?;

    let mut per_held_out_error = Vec::with_capacity(n);
    let mut skipped_folds = Vec::new();

    for held_out in 0..n {
        let training: Vec<T> = observations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != held_out)
            .map(|(_, o)| o.clone())
            .collect();

        if training.len() < required {
            tracing::warn!(fold = held_out, available = training.len(), required, "skipping fold");
            skipped_folds.push(SkippedFold {
                index: held_out,
                available: training.len(),
                required,
                reason: "too few training observations".into(),
            });
            per_held_out_error.push(None);
            continue;
        }

        let Some(fitted) = model.fit(&training) else {
            tracing::warn!(fold = held_out, "fit undefined on training fold, skipping");
            skipped_folds.push(SkippedFold {
                index: held_out,
                available: training.len(),
                required,
                reason: "fit undefined on training fold".into(),
            });
            per_held_out_error.push(None);
            continue;
        };

        let Some(error) = residual(model, &fitted, &observations[held_out]) else {
            tracing::warn!(fold = held_out, "held-out observation has no observed value, skipping");
            skipped_folds.push(SkippedFold {
                index: held_out,
                available: training.len(),
                required,
                reason: "no observed value under the training-fold fit".into(),
            });
            per_held_out_error.push(None);
            continue;
        };
        per_held_out_error.push(Some(error));
    }

    let scored: Vec<f64> = per_held_out_error.iter().flatten().copied().collect();
    let cv_error = stats::mean(&scored).ok_or(ResampleError::InsufficientSample {
        available: n.saturating_sub(1),
        required,
    })?;
    let ratio = generalization_ratio(cv_error, training_error);

    tracing::info!(
        folds = n,
        skipped = skipped_folds.len(),
        training_error,
        cv_error,
        ratio,
        "leave-one-out cross-validation complete"
    );

    Ok(LooOutcome {
        per_held_out_error,
        skipped_folds,
        training_error,
        cv_error,
        generalization_ratio: ratio,
        free_parameters: model.free_parameters(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(n: usize, seed: u64) -> Vec<(f64, f64)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| (i as f64 / n as f64, rng.gen_range(-1.0..1.0)))
            .collect()
    }

    #[test]
    fn mean_model_ratio_is_n_over_n_minus_one() {
        let data = noise(10, 4);
        let outcome = leave_one_out(&MeanModel, &data, 1).unwrap();
        assert_eq!(outcome.per_held_out_error.len(), 10);
        assert!((outcome.generalization_ratio - 10.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn extra_parameters_on_noise_raise_the_ratio() {
        for seed in 0..5 {
            let data = noise(12, seed);
            let mean = leave_one_out(&MeanModel, &data, 1).unwrap();
            let line = leave_one_out(&LinearModel, &data, 2).unwrap();
            let cubic = leave_one_out(&PolynomialModel { degree: 3 }, &data, 2).unwrap();
            assert!(line.generalization_ratio >= mean.generalization_ratio - 1e-9);
            assert!(cubic.generalization_ratio >= mean.generalization_ratio - 1e-9);
            assert!(cubic.generalization_ratio > 1.2);
        }
    }

    #[test]
    fn exact_line_generalizes() {
        let data: Vec<(f64, f64)> = (0..6).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let outcome = leave_one_out(&LinearModel, &data, 2).unwrap();
        assert!(outcome.training_error < 1e-9);
        assert!(outcome.cv_error < 1e-9);
        assert_eq!(outcome.skipped_folds.len(), 0);
    }

    #[test]
    fn too_few_points_skip_folds() {
        // Two points: each fold trains on one point, fewer than a line needs.
        let data = vec![(0.0, 1.0), (1.0, 3.0)];
        let err = leave_one_out(&LinearModel, &data, 2).unwrap_err();
        assert!(matches!(err, ResampleError::InsufficientSample { .. }));

        // Three points with one duplicated x: holding out the odd one leaves
        // a constant-x training set and the fold is skipped.
        let data = vec![(0.0, 1.0), (0.0, 1.5), (1.0, 3.0)];
        let outcome = leave_one_out(&LinearModel, &data, 2).unwrap();
        assert_eq!(outcome.skipped_folds.len(), 1);
        assert_eq!(outcome.skipped_folds[0].index, 2);
        assert_eq!(outcome.per_held_out_error[2], None);
        assert_eq!(outcome.scored_folds(), 2);
    }

    #[test]
    fn fn_model_refits_each_fold() {
        use std::cell::Cell;

        let fits = Cell::new(0usize);
        let model = FnModel::new(
            1,
            |train: &[f64]| {
                fits.set(fits.get() + 1);
                stats::mean(train)
            },
            |m: &f64, _: &f64| *m,
            |_: &f64, o: &f64| Some(*o),
        );
        let data = [1.0, 2.0, 3.0, 4.0];
        let outcome = leave_one_out(&model, &data, 1).unwrap();
        // One full fit plus one per fold.
        assert_eq!(fits.get(), 5);
        assert_eq!(outcome.free_parameters, 1);
    }

    #[test]
    fn observed_value_can_depend_on_the_fold() {
        // The held-out point is scored against the largest training value,
        // which only exists once the fold is known.
        let model = FnModel::new(
            1,
            |train: &[f64]| train.iter().copied().reduce(f64::max),
            |_: &f64, o: &f64| *o,
            |max: &f64, o: &f64| (*o < 10.0).then_some(*max),
        );
        let data = [1.0, 2.0, 4.0, 10.0];
        let outcome = leave_one_out(&model, &data, 1).unwrap();
        // Full fit: max 10, residuals 9, 8, 6 (10 itself has no observed value).
        assert!((outcome.training_error - 23.0 / 3.0).abs() < 1e-12);
        assert_eq!(outcome.per_held_out_error[0], Some(9.0));
        assert_eq!(outcome.per_held_out_error[3], None);
        assert_eq!(outcome.skipped_folds.len(), 1);
        assert_eq!(outcome.skipped_folds[0].index, 3);
    }
}
