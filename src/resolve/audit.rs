//! Reselection audit.
//!
//! Compares the selection made with all observations present against a
//! selection recomputed on a training fold. Any difference in the chosen
//! record or in the fallback flag is a disagreement: the selection step has
//! free choices that depend on which observations are present, and a
//! cross-validation that reuses the full-data selection would hide it.

use serde::Serialize;

use crate::assignment::AssignmentTable;

use super::ResolutionResult;
use super::error::ResolveResult;

/// One observation whose selection changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disagreement {
    pub observation: String,
    pub full: Option<String>,
    pub refit: Option<String>,
    pub full_fallback: bool,
    pub refit_fallback: bool,
}

/// Result of comparing full-data and refit selections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReselectionAudit {
    pub compared: usize,
    pub disagreements: Vec<Disagreement>,
}

impl ReselectionAudit {
    /// Compare two tables over the observations they share.
    pub fn compare(full: &AssignmentTable, refit: &AssignmentTable) -> Self {
        let mut audit = Self::default();
        for (id, original) in full.iter() {
            if let Some(other) = refit.get(id) {
                audit.record(id, original, other);
            }
        }
        audit
    }

    /// Recompute each observation's selection with `reselect`, which must
    /// build it from a fold that holds that observation out.
    pub fn leave_one_out<F>(full: &AssignmentTable, mut reselect: F) -> ResolveResult<Self>
    where
        F: FnMut(&str) -> ResolveResult<ResolutionResult>,
    {
        let mut audit = Self::default();
        for (id, original) in full.iter() {
            let refit = reselect(id)?;
            audit.record(id, original, &refit);
        }
        tracing::info!(
            compared = audit.compared,
            disagreements = audit.disagreements.len(),
            "leave-one-out reselection audit complete"
        );
        Ok(audit)
    }

    fn record(&mut self, id: &str, full: &ResolutionResult, refit: &ResolutionResult) {
        self.compared += 1;
        let same_record = full.selected_name() == refit.selected_name();
        let same_flag = full.fallback_triggered() == refit.fallback_triggered();
        if !(same_record && same_flag) {
            self.disagreements.push(Disagreement {
                observation: id.to_string(),
                full: full.selected_name().map(str::to_string),
                refit: refit.selected_name().map(str::to_string),
                full_fallback: full.fallback_triggered(),
                refit_fallback: refit.fallback_triggered(),
            });
        }
    }

    /// Fold another audit's comparisons into this one.
    pub fn merge(&mut self, other: Self) {
        self.compared += other.compared;
        self.disagreements.extend(other.disagreements);
    }

    pub fn is_stable(&self) -> bool {
        self.disagreements.is_empty()
    }

    /// Fraction of compared observations whose selection changed.
    pub fn disagreement_rate(&self) -> f64 {
        if self.compared == 0 {
            0.0
        } else {
            self.disagreements.len() as f64 / self.compared as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InvariantCatalog, InvariantRecord};
    use crate::resolve::{FallbackPolicy, Resolver, ResolverConfig, TargetSpec};
    use crate::rules::{Rule, RuleChain};
    use crate::target::TargetValue;

    fn catalog() -> InvariantCatalog {
        InvariantCatalog::from_records(vec![
            InvariantRecord::new("A", 1, 6).with_determinant(4),
            InvariantRecord::new("B", 1, 6).with_determinant(5),
            InvariantRecord::new("C", 1, 8).with_determinant(4),
        ])
        .unwrap()
    }

    fn spec() -> TargetSpec {
        TargetSpec::new(TargetValue::scalar(6.0))
            .with_rules(RuleChain::new().with(Rule::determinant_divisible_by(4)))
            .with_fallback(FallbackPolicy::Unfiltered)
    }

    #[test]
    fn detects_changed_selection() {
        let full_catalog = catalog();
        let resolver = Resolver::new(&full_catalog, ResolverConfig::default());
        let mut full = AssignmentTable::new();
        full.insert("p", resolver.resolve(&spec()).unwrap());

        let audit = ReselectionAudit::leave_one_out(&full, |_| {
            let reduced = full_catalog.without(&["A"]);
            Resolver::new(&reduced, ResolverConfig::default()).resolve(&spec())
        })
        .unwrap();
        assert_eq!(audit.compared, 1);
        assert_eq!(audit.disagreements.len(), 1);
        assert_eq!(audit.disagreements[0].full.as_deref(), Some("A"));
        assert_eq!(audit.disagreements[0].refit.as_deref(), Some("C"));
        assert_eq!(audit.disagreement_rate(), 1.0);
    }

    #[test]
    fn flags_fallback_only_changes() {
        let full_catalog = catalog();
        let resolver = Resolver::new(&full_catalog, ResolverConfig::default());
        let mut full = AssignmentTable::new();
        full.insert("p", resolver.resolve(&spec()).unwrap());

        // Without A and C only the unfiltered fallback can answer.
        let reduced = full_catalog.without(&["A", "C"]);
        let mut refit = AssignmentTable::new();
        refit.insert(
            "p",
            Resolver::new(&reduced, ResolverConfig::default())
                .resolve(&spec())
                .unwrap(),
        );
        let audit = ReselectionAudit::compare(&full, &refit);
        assert!(!audit.is_stable());
        assert!(audit.disagreements[0].refit_fallback);
        assert!(!audit.disagreements[0].full_fallback);
    }

    #[test]
    fn identical_tables_are_stable() {
        let full_catalog = catalog();
        let resolver = Resolver::new(&full_catalog, ResolverConfig::default());
        let mut table = AssignmentTable::new();
        table.insert("p", resolver.resolve(&spec()).unwrap());
        let audit = ReselectionAudit::compare(&table, &table.clone());
        assert!(audit.is_stable());
        assert_eq!(audit.compared, 1);
    }
}
