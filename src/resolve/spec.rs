//! Resolution requests: target, rules, distance, tie-break and fallback.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{InvariantRecord, Partition};
use crate::rules::{Candidate, RuleChain, RuleSpec};
use crate::target::{Observation, TargetValue};

use super::error::{ResolveError, ResolveResult};

// ---------------------------------------------------------------------------
// Features and distance
// ---------------------------------------------------------------------------

/// A numeric record field usable as a distance dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    #[default]
    CrossingNumber,
    Determinant,
    AbsDeterminant,
    Signature,
    HyperbolicVolume,
    /// A polynomial-derived feature by key.
    Named(String),
}

impl Feature {
    /// The feature's value on a record, `None` when undefined.
    pub fn value(&self, record: &InvariantRecord) -> Option<f64> {
        match self {
            Self::CrossingNumber => Some(f64::from(record.crossing_number)),
            Self::Determinant => Some(record.determinant as f64),
            Self::AbsDeterminant => Some(record.determinant.unsigned_abs() as f64),
            Self::Signature => Some(record.signature as f64),
            Self::HyperbolicVolume => record.hyperbolic_volume,
            Self::Named(key) => record.feature(key),
        }
    }
}

/// Weighted auxiliary distance term: `weight * |feature - target.auxiliary[key]|`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxTerm {
    pub feature: Feature,
    pub key: String,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

type CustomDistance = dyn Fn(&InvariantRecord, &TargetValue) -> f64 + Send + Sync;

/// Distance between a record and a target. Lower is better.
#[derive(Clone)]
pub enum DistanceFn {
    /// Absolute difference on the primary feature plus weighted auxiliary terms.
    Weighted {
        primary: Feature,
        auxiliary: Vec<AuxTerm>,
    },
    Custom(Arc<CustomDistance>),
}

impl DistanceFn {
    pub fn on(primary: Feature) -> Self {
        Self::Weighted {
            primary,
            auxiliary: Vec::new(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&InvariantRecord, &TargetValue) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate the distance. Undefined or NaN distances become `+inf`,
    /// so such records stay eligible but rank last.
    ///
    /// An auxiliary term whose key the target does not carry is skipped.
    pub fn eval(&self, record: &InvariantRecord, target: &TargetValue) -> f64 {
        let raw = match self {
            Self::Weighted { primary, auxiliary } => {
                let Some(value) = primary.value(record) else {
                    return f64::INFINITY;
                };
                let mut d = (value - target.primary).abs();
                for term in auxiliary {
                    let Some(wanted) = target.auxiliary.get(&term.key) else {
                        continue;
                    };
                    match term.feature.value(record) {
                        Some(v) => d += term.weight * (v - wanted).abs(),
                        None => return f64::INFINITY,
                    }
                }
                d
            }
            Self::Custom(f) => f(record, target),
        };
        if raw.is_nan() {
            f64::INFINITY
        } else if raw == 0.0 {
            // Fold -0.0 into +0.0 so exact ties compare equal.
            0.0
        } else {
            raw
        }
    }
}

impl Default for DistanceFn {
    fn default() -> Self {
        Self::on(Feature::CrossingNumber)
    }
}

impl std::fmt::Debug for DistanceFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weighted { primary, auxiliary } => f
                .debug_struct("Weighted")
                .field("primary", primary)
                .field("auxiliary", auxiliary)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tie-break order
// ---------------------------------------------------------------------------

/// One key of a tie-break order. Every key sorts ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieKey {
    CrossingNumber,
    /// Non-hyperbolic records sort after every hyperbolic one.
    HyperbolicVolume,
    /// Lexicographic name.
    Name,
    /// Position in the catalog.
    CatalogOrder,
}

impl TieKey {
    pub fn compare(self, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        match self {
            Self::CrossingNumber => a.record.crossing_number.cmp(&b.record.crossing_number),
            Self::HyperbolicVolume => match (a.record.hyperbolic_volume, b.record.hyperbolic_volume) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            Self::Name => a.record.name.cmp(&b.record.name),
            Self::CatalogOrder => a.position.cmp(&b.position),
        }
    }
}

/// The default order: lower crossing number, then lexicographic name.
pub fn default_tie_break() -> Vec<TieKey> {
    vec![TieKey::CrossingNumber, TieKey::Name]
}

// ---------------------------------------------------------------------------
// Fallback policy
// ---------------------------------------------------------------------------

/// What to search when the primary chain admits nothing.
#[derive(Debug, Clone, Default)]
pub enum FallbackPolicy {
    /// No fallback: an empty filtered set is `Unresolved`.
    #[default]
    None,
    /// A caller-supplied relaxed chain.
    Relaxed(RuleChain),
    /// The primary chain minus its last non-essential rule.
    DropLeastEssential,
    /// The whole partition, unfiltered.
    Unfiltered,
}

impl FallbackPolicy {
    /// The relaxed chain to search and a label describing the relaxation.
    pub fn relax(&self, primary: &RuleChain) -> Option<(RuleChain, String)> {
        match self {
            Self::None => None,
            Self::Relaxed(chain) => Some((chain.clone(), "relaxed chain".to_string())),
            Self::DropLeastEssential => primary
                .drop_least_essential()
                .map(|(chain, dropped)| (chain, format!("dropped rule '{dropped}'"))),
            Self::Unfiltered => Some((RuleChain::new(), "unfiltered partition".to_string())),
        }
    }
}

/// Serializable fallback description.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSpec {
    #[default]
    None,
    DropLeastEssential,
    Unfiltered,
    Relaxed(Vec<RuleSpec>),
}

impl FallbackSpec {
    pub fn compile(&self) -> FallbackPolicy {
        match self {
            Self::None => FallbackPolicy::None,
            Self::DropLeastEssential => FallbackPolicy::DropLeastEssential,
            Self::Unfiltered => FallbackPolicy::Unfiltered,
            Self::Relaxed(specs) => FallbackPolicy::Relaxed(RuleChain::from_specs(specs)),
        }
    }
}

// ---------------------------------------------------------------------------
// Target spec
// ---------------------------------------------------------------------------

/// One resolution request.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub target: TargetValue,
    pub partition: Partition,
    pub rules: RuleChain,
    pub distance: DistanceFn,
    pub tie_break: Vec<TieKey>,
    pub fallback: FallbackPolicy,
    /// Record names removed before filtering.
    pub exclude: BTreeSet<String>,
    /// The observation, for rules that read it.
    pub observation: Option<Observation>,
}

impl TargetSpec {
    pub fn new(target: TargetValue) -> Self {
        Self {
            target,
            partition: Partition::Knots,
            rules: RuleChain::new(),
            distance: DistanceFn::default(),
            tie_break: default_tie_break(),
            fallback: FallbackPolicy::None,
            exclude: BTreeSet::new(),
            observation: None,
        }
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_rules(mut self, rules: RuleChain) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_distance(mut self, distance: DistanceFn) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_tie_break(mut self, tie_break: Vec<TieKey>) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn for_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }

    /// Configuration checks. Failures here are defects in the run setup.
    pub fn validate(&self) -> ResolveResult<()> {
        self.rules.validate()?;
        if let FallbackPolicy::Relaxed(chain) = &self.fallback {
            chain.validate()?;
        }
        if self.tie_break.is_empty() {
            return Err(ResolveError::InvalidTieBreak {
                message: "no tie-break keys declared".into(),
            });
        }
        let mut seen = Vec::with_capacity(self.tie_break.len());
        for key in &self.tie_break {
            if seen.contains(key) {
                return Err(ResolveError::InvalidTieBreak {
                    message: format!("{key:?} listed twice"),
                });
            }
            seen.push(*key);
        }
        Ok(())
    }

    /// Compare two candidates under the declared tie-break order.
    pub fn compare_ties(&self, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        self.tie_break
            .iter()
            .map(|key| key.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How many ranked candidates each result keeps (default: 1).
    pub top_k: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { top_k: 1 }
    }
}

/// A hypothesis as configuration: everything in a [`TargetSpec`] except the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypothesisConfig {
    pub partition: Partition,
    pub feature: Feature,
    pub auxiliary: Vec<AuxTerm>,
    pub rules: Vec<RuleSpec>,
    pub fallback: FallbackSpec,
    pub tie_break: Vec<TieKey>,
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            partition: Partition::Knots,
            feature: Feature::CrossingNumber,
            auxiliary: Vec::new(),
            rules: Vec::new(),
            fallback: FallbackSpec::None,
            tie_break: default_tie_break(),
        }
    }
}

impl HypothesisConfig {
    /// Instantiate the hypothesis for one target.
    pub fn spec_for(&self, target: TargetValue) -> TargetSpec {
        TargetSpec::new(target)
            .with_partition(self.partition)
            .with_rules(RuleChain::from_specs(&self.rules))
            .with_distance(DistanceFn::Weighted {
                primary: self.feature.clone(),
                auxiliary: self.auxiliary.clone(),
            })
            .with_tie_break(self.tie_break.clone())
            .with_fallback(self.fallback.compile())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_feature_ranks_last() {
        let target = TargetValue::scalar(2.0);
        let torus = InvariantRecord::new("T", 1, 3);
        let d = DistanceFn::on(Feature::HyperbolicVolume).eval(&torus, &target);
        assert_eq!(d, f64::INFINITY);
        let nan = DistanceFn::custom(|_, _| f64::NAN).eval(&torus, &target);
        assert_eq!(nan, f64::INFINITY);
    }

    #[test]
    fn auxiliary_terms_add_weighted_distance() {
        let target = TargetValue::scalar(6.0).with_aux("det", 10.0);
        let record = InvariantRecord::new("K", 1, 7).with_determinant(7);
        let distance = DistanceFn::Weighted {
            primary: Feature::CrossingNumber,
            auxiliary: vec![AuxTerm {
                feature: Feature::Determinant,
                key: "det".into(),
                weight: 0.5,
            }],
        };
        assert!((distance.eval(&record, &target) - 2.5).abs() < 1e-12);
        // Targets without the auxiliary key skip the term.
        assert_eq!(distance.eval(&record, &TargetValue::scalar(6.0)), 1.0);
    }

    #[test]
    fn tie_break_validation() {
        let spec = TargetSpec::new(TargetValue::scalar(1.0)).with_tie_break(vec![]);
        assert!(matches!(spec.validate(), Err(ResolveError::InvalidTieBreak { .. })));
        let spec = TargetSpec::new(TargetValue::scalar(1.0))
            .with_tie_break(vec![TieKey::Name, TieKey::Name]);
        assert!(spec.validate().is_err());
        assert!(TargetSpec::new(TargetValue::scalar(1.0)).validate().is_ok());
    }

    #[test]
    fn volume_key_puts_non_hyperbolic_last() {
        let hyp = InvariantRecord::new("H", 1, 5).with_volume(2.8);
        let torus = InvariantRecord::new("T", 1, 5);
        let a = Candidate { position: 1, record: &hyp };
        let b = Candidate { position: 0, record: &torus };
        assert_eq!(TieKey::HyperbolicVolume.compare(&a, &b), Ordering::Less);
        assert_eq!(TieKey::CatalogOrder.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn hypothesis_config_builds_spec() {
        let config: HypothesisConfig = toml::from_str(
            r#"
            partition = "links"
            feature = { named = "jones_slope" }
            fallback = "unfiltered"
            tie_break = ["hyperbolic_volume", "name"]

            [[rules]]
            kind = "component_count"
            count = 2
            "#,
        )
        .unwrap();
        let spec = config.spec_for(TargetValue::scalar(1.0));
        assert_eq!(spec.partition, Partition::Links);
        assert_eq!(spec.rules.len(), 1);
        assert!(matches!(spec.fallback, FallbackPolicy::Unfiltered));
        assert_eq!(spec.tie_break, vec![TieKey::HyperbolicVolume, TieKey::Name]);
    }
}
