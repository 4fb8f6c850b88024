//! Two-phase select-then-fallback resolution.
//!
//! Each request walks a small state machine:
//!
//! - **Filtering**: apply the rule chain to the requested partition.
//! - **Ranking**: argmin of the distance over the survivors, ties broken by
//!   the declared order. If the order fails to separate the winners the
//!   outcome is `Ambiguous`, never an arbitrary pick.
//! - **Fallback**: when filtering leaves nothing, search again with the
//!   relaxed chain. A hit is `ResolvedViaFallback`; an empty relaxed search
//!   is `Unresolved`.
//!
//! The fallback flag is part of every result, so a leave-one-out rerun can
//! see when a selection only succeeded through relaxation.

pub mod audit;
pub mod error;
pub mod spec;

use serde::Serialize;

use crate::catalog::{InvariantCatalog, InvariantRecord};
use crate::rules::{Candidate, RuleChain, RuleContext, filter_candidates};

pub use audit::{Disagreement, ReselectionAudit};
pub use error::{ResolveError, ResolveResult};
pub use spec::{
    AuxTerm, DistanceFn, FallbackPolicy, FallbackSpec, Feature, HypothesisConfig, ResolverConfig,
    TargetSpec, TieKey, default_tie_break,
};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Terminal state of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Best candidate under the primary chain.
    Resolved { record: InvariantRecord, distance: f64 },
    /// Best candidate under the relaxed chain.
    ResolvedViaFallback {
        record: InvariantRecord,
        distance: f64,
        relaxation: String,
    },
    /// Neither the primary nor the relaxed search admitted anything.
    Unresolved { reason: String },
    /// The tie-break order left more than one winner.
    Ambiguous { tied: Vec<String>, via_fallback: bool },
}

/// A ranked candidate kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub name: String,
    pub distance: f64,
}

/// Output of one resolver invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub outcome: ResolutionOutcome,
    /// Partition size before filtering.
    pub candidate_count: usize,
    /// Survivors of the primary chain.
    pub filtered_count: usize,
    /// Survivors of the relaxed chain, when the fallback ran.
    pub fallback_filtered_count: Option<usize>,
    /// Top-k candidates of the phase that produced the outcome, best first.
    pub ranked: Vec<RankedCandidate>,
}

impl ResolutionResult {
    /// An unresolved result that never reached the catalog.
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self {
            outcome: ResolutionOutcome::Unresolved {
                reason: reason.into(),
            },
            candidate_count: 0,
            filtered_count: 0,
            fallback_filtered_count: None,
            ranked: Vec::new(),
        }
    }

    /// The selected record, if any.
    pub fn record(&self) -> Option<&InvariantRecord> {
        match &self.outcome {
            ResolutionOutcome::Resolved { record, .. }
            | ResolutionOutcome::ResolvedViaFallback { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn selected_name(&self) -> Option<&str> {
        self.record().map(|r| r.name.as_str())
    }

    pub fn distance(&self) -> Option<f64> {
        match &self.outcome {
            ResolutionOutcome::Resolved { distance, .. }
            | ResolutionOutcome::ResolvedViaFallback { distance, .. } => Some(*distance),
            _ => None,
        }
    }

    /// Whether a relaxed search ran. Always false when the primary chain
    /// admitted something.
    pub fn fallback_triggered(&self) -> bool {
        self.fallback_filtered_count.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.record().is_some()
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.outcome, ResolutionOutcome::Ambiguous { .. })
    }

    /// Turn an ambiguous outcome into an error, for callers that must abort.
    pub fn require_unique(self) -> ResolveResult<Self> {
        match self.outcome {
            ResolutionOutcome::Ambiguous { tied, .. } => {
                Err(ResolveError::AmbiguousSelection { tied })
            }
            _ => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Ranks filtered candidates and applies the fallback policy.
#[derive(Debug, Clone)]
pub struct Resolver<'c> {
    catalog: &'c InvariantCatalog,
    config: ResolverConfig,
}

enum Ranking {
    Winner {
        record: InvariantRecord,
        distance: f64,
        ranked: Vec<RankedCandidate>,
    },
    Tied {
        tied: Vec<String>,
        ranked: Vec<RankedCandidate>,
    },
}

impl<'c> Resolver<'c> {
    pub fn new(catalog: &'c InvariantCatalog, config: ResolverConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &'c InvariantCatalog {
        self.catalog
    }

    /// Resolve one request.
    ///
    /// Errors only on configuration defects in `spec`. Unresolved and
    /// ambiguous selections are reported through the outcome.
    pub fn resolve(&self, spec: &TargetSpec) -> ResolveResult<ResolutionResult> {
        spec.validate()?;

        let mut ctx = RuleContext::new(&spec.target);
        if let Some(obs) = &spec.observation {
            ctx = ctx.with_observation(obs);
        }

        let candidate_count = self.catalog.partition_len(spec.partition);
        let filtered = self.filter(spec, &spec.rules, &ctx);
        let filtered_count = filtered.len();

        if !filtered.is_empty() {
            let outcome = match self.rank(spec, filtered) {
                Ranking::Winner {
                    record,
                    distance,
                    ranked,
                } => (ResolutionOutcome::Resolved { record, distance }, ranked),
                Ranking::Tied { tied, ranked } => (
                    ResolutionOutcome::Ambiguous {
                        tied,
                        via_fallback: false,
                    },
                    ranked,
                ),
            };
            return Ok(ResolutionResult {
                outcome: outcome.0,
                candidate_count,
                filtered_count,
                fallback_filtered_count: None,
                ranked: outcome.1,
            });
        }

        let Some((relaxed, relaxation)) = spec.fallback.relax(&spec.rules) else {
            return Ok(ResolutionResult {
                outcome: ResolutionOutcome::Unresolved {
                    reason: "no admissible candidate and no fallback".into(),
                },
                candidate_count,
                filtered_count,
                fallback_filtered_count: None,
                ranked: Vec::new(),
            });
        };

        let fallback = self.filter(spec, &relaxed, &ctx);
        let fallback_count = fallback.len();
        tracing::debug!(
            target_value = spec.target.primary,
            relaxation = %relaxation,
            fallback_count,
            "primary rule chain empty, searching relaxed chain"
        );

        let (outcome, ranked) = if fallback.is_empty() {
            (
                ResolutionOutcome::Unresolved {
                    reason: format!("no admissible candidate, fallback ({relaxation}) also empty"),
                },
                Vec::new(),
            )
        } else {
            match self.rank(spec, fallback) {
                Ranking::Winner {
                    record,
                    distance,
                    ranked,
                } => (
                    ResolutionOutcome::ResolvedViaFallback {
                        record,
                        distance,
                        relaxation,
                    },
                    ranked,
                ),
                Ranking::Tied { tied, ranked } => (
                    ResolutionOutcome::Ambiguous {
                        tied,
                        via_fallback: true,
                    },
                    ranked,
                ),
            }
        };

        Ok(ResolutionResult {
            outcome,
            candidate_count,
            filtered_count,
            fallback_filtered_count: Some(fallback_count),
            ranked,
        })
    }

    fn filter(
        &self,
        spec: &TargetSpec,
        chain: &RuleChain,
        ctx: &RuleContext<'_>,
    ) -> Vec<Candidate<'c>> {
        filter_candidates(self.catalog, spec.partition, chain, ctx, &spec.exclude)
    }

    /// Sort by (distance, tie-break order) and detect unseparated winners.
    fn rank(&self, spec: &TargetSpec, candidates: Vec<Candidate<'c>>) -> Ranking {
        let mut scored: Vec<(f64, Candidate<'c>)> = candidates
            .into_iter()
            .map(|c| (spec.distance.eval(c.record, &spec.target), c))
            .collect();
        scored.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| spec.compare_ties(a, b)));

        let ranked: Vec<RankedCandidate> = scored
            .iter()
            .take(self.config.top_k.max(1))
            .map(|(distance, c)| RankedCandidate {
                name: c.record.name.clone(),
                distance: *distance,
            })
            .collect();

        let (best_distance, best) = scored[0];
        let tied: Vec<String> = scored
            .iter()
            .take_while(|(d, c)| {
                d.total_cmp(&best_distance).is_eq() && spec.compare_ties(c, &best).is_eq()
            })
            .map(|(_, c)| c.record.name.clone())
            .collect();

        if tied.len() > 1 {
            tracing::warn!(?tied, "tie-break order did not separate candidates");
            return Ranking::Tied { tied, ranked };
        }

        Ranking::Winner {
            record: best.record.clone(),
            distance: best_distance,
            ranked,
        }
    }
}
