//! Per-run accumulation of resolution results.
//!
//! An [`AssignmentTable`] maps observation ids to their [`ResolutionResult`]
//! in insertion order. It is owned by one run and dropped with it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::base_name;
use crate::resolve::{ResolutionOutcome, ResolutionResult, ResolveError, ResolveResult, Resolver, TargetSpec};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a resolution ends `Ambiguous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Log it, keep the ambiguous entry, continue the run.
    #[default]
    Skip,
    /// Abort the run with `AmbiguousSelection`.
    Abort,
}

/// Settings for building an assignment table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignConfig {
    /// Exclude base names already assigned to earlier observations (default: false).
    pub distinct_base_names: bool,
    pub on_ambiguous: AmbiguityPolicy,
    /// Resolve observations on the rayon pool. Ignored with distinct base names,
    /// which make each selection depend on the ones before it (default: false).
    pub parallel: bool,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// One row of the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub observation: String,
    pub result: ResolutionResult,
}

/// Observation id → resolution result, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentTable {
    entries: Vec<Assignment>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// Counts over a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AssignmentSummary {
    pub total: usize,
    /// Resolved under the primary chain.
    pub resolved_count: usize,
    pub fallback_count: usize,
    pub unresolved_count: usize,
    pub ambiguous_count: usize,
    /// Distinct selected records, ignoring disambiguation suffixes.
    pub unique_base_name_count: usize,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. A repeated id replaces the earlier entry in place.
    pub fn insert(&mut self, observation: impl Into<String>, result: ResolutionResult) {
        let observation = observation.into();
        if let Some(&i) = self.index.get(&observation) {
            self.entries[i].result = result;
            return;
        }
        self.index.insert(observation.clone(), self.entries.len());
        self.entries.push(Assignment {
            observation,
            result,
        });
    }

    pub fn get(&self, observation: &str) -> Option<&ResolutionResult> {
        self.index.get(observation).map(|&i| &self.entries[i].result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolutionResult)> {
        self.entries
            .iter()
            .map(|a| (a.observation.as_str(), &a.result))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Base names of every selected record.
    pub fn taken_base_names(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter_map(|e| e.result.record())
            .map(|r| r.base_name().to_string())
            .collect()
    }

    pub fn summary(&self) -> AssignmentSummary {
        let mut summary = AssignmentSummary {
            total: self.entries.len(),
            ..Default::default()
        };
        let mut bases = HashSet::new();
        for entry in &self.entries {
            match &entry.result.outcome {
                ResolutionOutcome::Resolved { .. } => summary.resolved_count += 1,
                ResolutionOutcome::ResolvedViaFallback { .. } => summary.fallback_count += 1,
                ResolutionOutcome::Unresolved { .. } => summary.unresolved_count += 1,
                ResolutionOutcome::Ambiguous { .. } => summary.ambiguous_count += 1,
            }
            if let Some(record) = entry.result.record() {
                bases.insert(record.base_name());
            }
        }
        summary.unique_base_name_count = bases.len();
        summary
    }

    /// Resolve every request and collect the results.
    ///
    /// All specs are validated before any resolution runs, so a malformed
    /// chain or tie-break order fails the whole run up front.
    pub fn build(
        resolver: &Resolver<'_>,
        requests: Vec<(String, TargetSpec)>,
        config: &AssignConfig,
    ) -> ResolveResult<Self> {
        for (_, spec) in &requests {
            spec.validate()?;
        }

        let results: Vec<(String, ResolutionResult)> = if config.distinct_base_names {
            Self::resolve_distinct(resolver, requests)?
        } else if config.parallel {
            use rayon::prelude::*;

            requests
                .into_par_iter()
                .map(|(id, spec)| resolver.resolve(&spec).map(|r| (id, r)))
                .collect::<ResolveResult<Vec<_>>>()?
        } else {
            requests
                .into_iter()
                .map(|(id, spec)| resolver.resolve(&spec).map(|r| (id, r)))
                .collect::<ResolveResult<Vec<_>>>()?
        };

        let mut table = Self::new();
        for (id, result) in results {
            if let ResolutionOutcome::Ambiguous { tied, .. } = &result.outcome {
                match config.on_ambiguous {
                    AmbiguityPolicy::Abort => {
                        return Err(ResolveError::AmbiguousSelection { tied: tied.clone() });
                    }
                    AmbiguityPolicy::Skip => {
                        tracing::warn!(observation = %id, ?tied, "ambiguous selection skipped");
                    }
                }
            }
            table.insert(id, result);
        }

        let summary = table.summary();
        tracing::info!(
            total = summary.total,
            resolved = summary.resolved_count,
            fallback = summary.fallback_count,
            unresolved = summary.unresolved_count,
            ambiguous = summary.ambiguous_count,
            "assignment table built"
        );
        Ok(table)
    }

    /// Sequential resolution where each observation excludes the base names
    /// already taken.
    fn resolve_distinct(
        resolver: &Resolver<'_>,
        requests: Vec<(String, TargetSpec)>,
    ) -> ResolveResult<Vec<(String, ResolutionResult)>> {
        let catalog = resolver.catalog();
        let mut taken: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(requests.len());

        for (id, spec) in requests {
            let spec = spec.excluding(catalog.names_with_base(&taken));
            let result = resolver.resolve(&spec)?;
            if let Some(record) = result.record() {
                taken.insert(base_name(&record.name).to_string());
            }
            out.push((id, result));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InvariantCatalog, InvariantRecord};
    use crate::resolve::{FallbackPolicy, ResolverConfig, TieKey};
    use crate::rules::{Rule, RuleChain};
    use crate::target::TargetValue;

    fn catalog() -> InvariantCatalog {
        InvariantCatalog::from_records(vec![
            InvariantRecord::new("K3", 1, 3).with_determinant(3),
            InvariantRecord::new("K4", 1, 4).with_determinant(5),
            InvariantRecord::new("K5", 1, 5).with_determinant(7),
            InvariantRecord::new("K6#1", 1, 6).with_determinant(9),
            InvariantRecord::new("K6#2", 1, 6).with_determinant(11),
        ])
        .unwrap()
    }

    fn requests(targets: &[(&str, f64)]) -> Vec<(String, TargetSpec)> {
        targets
            .iter()
            .map(|(id, t)| (id.to_string(), TargetSpec::new(TargetValue::scalar(*t))))
            .collect()
    }

    #[test]
    fn summary_counts_every_outcome() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, ResolverConfig::default());
        let mut reqs = requests(&[("a", 3.0), ("b", 6.0)]);
        reqs.push((
            "c".into(),
            TargetSpec::new(TargetValue::scalar(4.0))
                .with_rules(RuleChain::new().with(Rule::crossing_range(10, 12)))
                .with_fallback(FallbackPolicy::Unfiltered),
        ));
        reqs.push((
            "d".into(),
            TargetSpec::new(TargetValue::scalar(4.0))
                .with_rules(RuleChain::new().with(Rule::crossing_range(10, 12))),
        ));
        reqs.push((
            "e".into(),
            TargetSpec::new(TargetValue::scalar(6.0)).with_tie_break(vec![TieKey::CrossingNumber]),
        ));
        let table = AssignmentTable::build(&resolver, reqs, &AssignConfig::default()).unwrap();
        let summary = table.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.resolved_count, 2);
        assert_eq!(summary.fallback_count, 1);
        assert_eq!(summary.unresolved_count, 1);
        assert_eq!(summary.ambiguous_count, 1);
        // K3, K6#1 and K4 (via fallback).
        assert_eq!(summary.unique_base_name_count, 3);
    }

    #[test]
    fn abort_policy_stops_on_ambiguity() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, ResolverConfig::default());
        let reqs = vec![(
            "e".to_string(),
            TargetSpec::new(TargetValue::scalar(6.0)).with_tie_break(vec![TieKey::CrossingNumber]),
        )];
        let config = AssignConfig {
            on_ambiguous: AmbiguityPolicy::Abort,
            ..Default::default()
        };
        let err = AssignmentTable::build(&resolver, reqs, &config).unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousSelection { .. }));
    }

    #[test]
    fn invalid_spec_fails_before_resolving() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, ResolverConfig::default());
        let mut reqs = requests(&[("a", 3.0)]);
        reqs.push((
            "bad".into(),
            TargetSpec::new(TargetValue::scalar(1.0)).with_tie_break(vec![]),
        ));
        assert!(AssignmentTable::build(&resolver, reqs, &AssignConfig::default()).is_err());
    }

    #[test]
    fn distinct_base_names_block_variants() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, ResolverConfig::default());
        let config = AssignConfig {
            distinct_base_names: true,
            ..Default::default()
        };
        let table =
            AssignmentTable::build(&resolver, requests(&[("x", 6.0), ("y", 6.0), ("z", 6.0)]), &config)
                .unwrap();
        // x takes K6#1; y may not take K6#2 (same base), so it takes K5.
        assert_eq!(table.get("x").unwrap().selected_name(), Some("K6#1"));
        assert_eq!(table.get("y").unwrap().selected_name(), Some("K5"));
        assert_eq!(table.get("z").unwrap().selected_name(), Some("K4"));
        assert_eq!(table.summary().unique_base_name_count, 3);
    }

    #[test]
    fn parallel_matches_sequential() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, ResolverConfig { top_k: 2 });
        let targets: Vec<(String, f64)> =
            (0..40).map(|i| (format!("o{i}"), 2.0 + (i as f64) * 0.11)).collect();
        let build = |parallel| {
            let reqs = targets
                .iter()
                .map(|(id, t)| (id.clone(), TargetSpec::new(TargetValue::scalar(*t))))
                .collect();
            let config = AssignConfig {
                parallel,
                ..Default::default()
            };
            AssignmentTable::build(&resolver, reqs, &config).unwrap()
        };
        assert_eq!(build(false), build(true));
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut table = AssignmentTable::new();
        table.insert("a", ResolutionResult::unresolved("first"));
        table.insert("b", ResolutionResult::unresolved("second"));
        table.insert("a", ResolutionResult::unresolved("third"));
        assert_eq!(table.len(), 2);
        let ids: Vec<&str> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
