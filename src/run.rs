//! Analysis run facade.
//!
//! An [`AnalysisRun`] owns the catalog snapshot and the run configuration
//! and threads them through target computation, resolution and the
//! resampling checks. Nothing here reads global state.

use std::sync::Arc;

use serde::Serialize;

use std::collections::HashSet;

use crate::assignment::{AssignmentSummary, AssignmentTable};
use crate::catalog::InvariantCatalog;
use crate::config::{ParamBag, RunConfig};
use crate::error::KnotFitResult;
use crate::resample::{FoldModel, ResamplingHarness, ResamplingOutcome};
use crate::resolve::{Feature, ReselectionAudit, ResolutionResult, Resolver, TargetSpec};
use crate::stats::{self, LineFit};
use crate::target::{Observation, TargetError, TargetFormula, TargetResult, TargetValue};

/// Everything a run hands to the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: AssignmentSummary,
    pub assignments: AssignmentTable,
    pub outcomes: Vec<ResamplingOutcome>,
}

/// One analysis run over a fixed catalog.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    catalog: Arc<InvariantCatalog>,
    config: RunConfig,
}

impl AnalysisRun {
    pub fn new(catalog: Arc<InvariantCatalog>, config: RunConfig) -> KnotFitResult<Self> {
        config.validate()?;
        tracing::info!(
            records = catalog.len(),
            partition = %config.hypothesis.partition,
            rules = config.hypothesis.rules.len(),
            "analysis run configured"
        );
        Ok(Self { catalog, config })
    }

    pub fn catalog(&self) -> &InvariantCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamBag {
        &self.config.params
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.catalog, self.config.resolver.clone())
    }

    pub fn harness(&self) -> KnotFitResult<ResamplingHarness> {
        Ok(ResamplingHarness::new(self.config.resampling.clone())?)
    }

    /// Compute targets, build one spec per observation and resolve them all.
    ///
    /// An observation whose target is undefined (outside the formula's
    /// domain, or not finite) is recorded as unresolved and the run
    /// continues. Missing or mistyped formula parameters and malformed specs
    /// abort the run before any resolution.
    pub fn resolve_observations<F, S>(
        &self,
        observations: &[Observation],
        formula: &F,
        spec_for: S,
    ) -> KnotFitResult<AssignmentTable>
    where
        F: TargetFormula + ?Sized,
        S: Fn(&Observation, TargetValue) -> TargetSpec,
    {
        for key in formula.required_params() {
            self.params().get_f64(&key)?;
        }

        let mut requests = Vec::with_capacity(observations.len());
        let mut failures: Vec<(String, String)> = Vec::new();

        for obs in observations {
            match self.target_of(obs, formula) {
                Ok(target) => {
                    let spec = spec_for(obs, target).for_observation(obs.clone());
                    requests.push((obs.id.clone(), spec));
                }
                Err(TargetError::Config(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(observation = %obs.id, error = %e, "target undefined, leaving unresolved");
                    failures.push((obs.id.clone(), e.to_string()));
                }
            }
        }

        let resolved =
            AssignmentTable::build(&self.resolver(), requests, &self.config.assignment)?;

        let mut table = AssignmentTable::new();
        for obs in observations {
            if let Some(result) = resolved.get(&obs.id) {
                table.insert(obs.id.clone(), result.clone());
            } else if let Some((_, reason)) = failures.iter().find(|(id, _)| id == &obs.id) {
                table.insert(obs.id.clone(), ResolutionResult::unresolved(reason.clone()));
            }
        }
        Ok(table)
    }

    /// The observation's target, rejected when not finite.
    fn target_of<F>(&self, observation: &Observation, formula: &F) -> TargetResult<TargetValue>
    where
        F: TargetFormula + ?Sized,
    {
        formula
            .target(observation, self.params())?
            .ensure_finite(&observation.id)
    }

    /// Resolve using the configured hypothesis.
    pub fn resolve_hypothesis<F>(
        &self,
        observations: &[Observation],
        formula: &F,
    ) -> KnotFitResult<AssignmentTable>
    where
        F: TargetFormula + ?Sized,
    {
        let hypothesis = &self.config.hypothesis;
        self.resolve_observations(observations, formula, |_, target| hypothesis.spec_for(target))
    }

    /// Re-run the hypothesis once per held-out observation and compare each
    /// training fold's selections against the full-data table.
    ///
    /// Only matters when selections interact (distinct base names); with
    /// independent resolution every fold agrees.
    pub fn reselection_audit<F>(
        &self,
        observations: &[Observation],
        formula: &F,
        full: &AssignmentTable,
    ) -> KnotFitResult<ReselectionAudit>
    where
        F: TargetFormula + ?Sized,
    {
        let mut audit = ReselectionAudit::default();
        for held_out in 0..observations.len() {
            let fold: Vec<Observation> = observations
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != held_out)
                .map(|(_, obs)| obs.clone())
                .collect();
            let refit = self.resolve_hypothesis(&fold, formula)?;
            audit.merge(ReselectionAudit::compare(full, &refit));
        }
        tracing::info!(
            folds = observations.len(),
            compared = audit.compared,
            disagreements = audit.disagreements.len(),
            "fold reselection audit complete"
        );
        Ok(audit)
    }

    /// `(target, selected feature)` pairs for every resolved observation.
    pub fn fit_pairs<F>(
        &self,
        observations: &[Observation],
        formula: &F,
        table: &AssignmentTable,
        feature: &Feature,
    ) -> Vec<(f64, f64)>
    where
        F: TargetFormula + ?Sized,
    {
        observations
            .iter()
            .filter_map(|obs| {
                let record = table.get(&obs.id)?.record()?;
                let target = self.target_of(obs, formula).ok()?;
                Some((target.primary, feature.value(record)?))
            })
            .collect()
    }

    /// Certify a target-vs-feature association: permutation test on the
    /// Pearson correlation and bootstrap interval on the slope of the
    /// full-data pairs, then LOO-CV of the line fit in which every fold
    /// re-resolves its own training observations.
    pub fn significance<F>(
        &self,
        observations: &[Observation],
        formula: &F,
        table: &AssignmentTable,
    ) -> KnotFitResult<Vec<ResamplingOutcome>>
    where
        F: TargetFormula + ?Sized,
    {
        let harness = self.harness()?;
        let feature = &self.config.hypothesis.feature;
        let pairs = self.fit_pairs(observations, formula, table, feature);
        let (x, y): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();

        let permutation = harness.permutation(&x, &y, stats::pearson)?;
        let bootstrap = harness.bootstrap(&pairs, |sample: &[(f64, f64)]| {
            let (sx, sy): (Vec<f64>, Vec<f64>) = sample.iter().copied().unzip();
            stats::fit_line(&sx, &sy).map(|fit| fit.slope)
        })?;

        let points: Vec<FoldPoint> = observations
            .iter()
            .filter_map(|obs| {
                let target = self.target_of(obs, formula).ok()?;
                Some(FoldPoint {
                    observation: obs.clone(),
                    target,
                })
            })
            .collect();
        let model = ReselectingLine { run: self, formula };
        let loo = harness.leave_one_out(&model, &points)?;

        Ok(vec![
            ResamplingOutcome::Permutation(permutation),
            ResamplingOutcome::Bootstrap(bootstrap),
            ResamplingOutcome::LeaveOneOut(loo),
        ])
    }

    /// Resolve with the configured hypothesis and, optionally, run the
    /// significance checks on the resulting fit.
    pub fn report<F>(
        &self,
        observations: &[Observation],
        formula: &F,
        with_significance: bool,
    ) -> KnotFitResult<RunReport>
    where
        F: TargetFormula + ?Sized,
    {
        let assignments = self.resolve_hypothesis(observations, formula)?;
        let outcomes = if with_significance {
            self.significance(observations, formula, &assignments)?
        } else {
            Vec::new()
        };
        Ok(RunReport {
            summary: assignments.summary(),
            assignments,
            outcomes,
        })
    }
}

// ---------------------------------------------------------------------------
// Fold refit
// ---------------------------------------------------------------------------

/// An observation with its target, as handed to each LOO fold.
#[derive(Debug, Clone)]
struct FoldPoint {
    observation: Observation,
    target: TargetValue,
}

/// A training fold's selections and the line fitted through them.
struct FoldFit {
    table: AssignmentTable,
    taken: HashSet<String>,
    line: LineFit,
}

/// Feature-vs-target line whose fit includes catalog selection.
///
/// Each fold resolves its training observations from scratch. A held-out
/// observation is then resolved against what that fold already took, so
/// under distinct base names its scored record can differ from the
/// full-data one.
struct ReselectingLine<'r, F: ?Sized> {
    run: &'r AnalysisRun,
    formula: &'r F,
}

impl<F> FoldModel<FoldPoint> for ReselectingLine<'_, F>
where
    F: TargetFormula + ?Sized,
{
    type Fitted = FoldFit;

    fn free_parameters(&self) -> usize {
        2
    }

    fn fit(&self, training: &[FoldPoint]) -> Option<FoldFit> {
        let observations: Vec<Observation> =
            training.iter().map(|p| p.observation.clone()).collect();
        let table = self.run.resolve_hypothesis(&observations, self.formula).ok()?;
        let feature = &self.run.config.hypothesis.feature;
        let pairs = self.run.fit_pairs(&observations, self.formula, &table, feature);
        let (x, y): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let line = stats::fit_line(&x, &y)?;
        Some(FoldFit {
            taken: table.taken_base_names(),
            table,
            line,
        })
    }

    fn predict(&self, fitted: &FoldFit, point: &FoldPoint) -> f64 {
        fitted.line.predict(point.target.primary)
    }

    fn observed(&self, fitted: &FoldFit, point: &FoldPoint) -> Option<f64> {
        let hypothesis = &self.run.config.hypothesis;
        let obs = &point.observation;
        if let Some(result) = fitted.table.get(&obs.id) {
            return hypothesis.feature.value(result.record()?);
        }

        let mut spec = hypothesis
            .spec_for(point.target.clone())
            .for_observation(obs.clone());
        if self.run.config.assignment.distinct_base_names {
            spec = spec.excluding(self.run.catalog.names_with_base(&fitted.taken));
        }
        let result = self.run.resolver().resolve(&spec).ok()?;
        hypothesis.feature.value(result.record()?)
    }
}
