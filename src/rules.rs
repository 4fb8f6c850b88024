//! Admissibility rules and rule chains.
//!
//! A [`Rule`] is a named pure predicate over a record and the static
//! context of one resolution request. A [`RuleChain`] ANDs rules in
//! declaration order. Rules can be built in code from closures or loaded
//! declaratively via [`RuleSpec`].

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{InvariantCatalog, InvariantRecord, Partition, SymmetryClass};
use crate::resolve::error::{ResolveError, ResolveResult};
use crate::target::{Observation, TargetValue};

// ---------------------------------------------------------------------------
// Rule context
// ---------------------------------------------------------------------------

/// Static context a rule may read besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub target: &'a TargetValue,
    pub observation: Option<&'a Observation>,
}

impl<'a> RuleContext<'a> {
    pub fn new(target: &'a TargetValue) -> Self {
        Self {
            target,
            observation: None,
        }
    }

    pub fn with_observation(mut self, observation: &'a Observation) -> Self {
        self.observation = Some(observation);
        self
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

type Predicate = dyn Fn(&InvariantRecord, &RuleContext<'_>) -> bool + Send + Sync;

/// A named admissibility predicate.
#[derive(Clone)]
pub struct Rule {
    name: String,
    essential: bool,
    defect: Option<String>,
    predicate: Arc<Predicate>,
}

impl Rule {
    /// Wrap an arbitrary closure over record fields.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvariantRecord, &RuleContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            essential: false,
            defect: None,
            predicate: Arc::new(predicate),
        }
    }

    /// Mark the rule as essential: `DropLeastEssential` fallback never removes it.
    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_essential(&self) -> bool {
        self.essential
    }

    pub fn check(&self, record: &InvariantRecord, ctx: &RuleContext<'_>) -> bool {
        (self.predicate)(record, ctx)
    }

    fn with_defect(mut self, defect: Option<String>) -> Self {
        self.defect = defect;
        self
    }

    /// `crossing_number` within `[lo, hi]`.
    pub fn crossing_range(lo: u32, hi: u32) -> Self {
        let defect = (lo > hi).then(|| format!("empty crossing range [{lo}, {hi}]"));
        Self::new(format!("crossing_in_{lo}_{hi}"), move |r, _| {
            (lo..=hi).contains(&r.crossing_number)
        })
        .with_defect(defect)
    }

    /// `determinant % divisor == 0`. Wrapping remainder keeps `i64::MIN % -1` defined.
    pub fn determinant_divisible_by(divisor: i64) -> Self {
        let defect = (divisor == 0).then(|| "divisor must be non-zero".to_string());
        Self::new(format!("determinant_mod_{divisor}"), move |r, _| {
            divisor != 0 && r.determinant.wrapping_rem(divisor) == 0
        })
        .with_defect(defect)
    }

    /// `|determinant|` is (or is not) a power of two.
    pub fn determinant_power_of_two(expected: bool) -> Self {
        let name = if expected {
            "determinant_power_of_two"
        } else {
            "determinant_not_power_of_two"
        };
        Self::new(name, move |r, _| {
            let d = r.determinant.unsigned_abs();
            d.is_power_of_two() == expected
        })
    }

    /// Exactly `count` components.
    pub fn component_count(count: u32) -> Self {
        let defect = (count == 0).then(|| "component count must be >= 1".to_string());
        Self::new(format!("components_eq_{count}"), move |r, _| {
            r.component_count == count
        })
        .with_defect(defect)
    }

    /// Component count requested by the observation. Passes when the
    /// observation does not constrain it.
    pub fn observation_components() -> Self {
        Self::new("components_match_observation", |r, ctx| {
            ctx.observation
                .and_then(|o| o.components)
                .is_none_or(|n| r.component_count == n)
        })
    }

    pub fn symmetry(class: SymmetryClass) -> Self {
        Self::new(format!("symmetry_{class:?}").to_lowercase(), move |r, _| {
            r.symmetry_class == class
        })
    }

    /// Record is (or is not) hyperbolic.
    pub fn hyperbolic(expected: bool) -> Self {
        let name = if expected { "hyperbolic" } else { "not_hyperbolic" };
        Self::new(name, move |r, _| r.is_hyperbolic() == expected)
    }

    pub fn signature_parity(even: bool) -> Self {
        let name = if even { "signature_even" } else { "signature_odd" };
        Self::new(name, move |r, _| (r.signature % 2 == 0) == even)
    }

    /// A polynomial-derived feature within `[lo, hi]`. Undefined features fail.
    pub fn feature_range(feature: impl Into<String>, lo: f64, hi: f64) -> Self {
        let feature = feature.into();
        let defect = if lo <= hi {
            None
        } else {
            Some(format!("empty range [{lo}, {hi}] for {feature}"))
        };
        let name = format!("{feature}_in_range");
        Self::new(name, move |r, _| {
            r.feature(&feature).is_some_and(|v| v >= lo && v <= hi)
        })
        .with_defect(defect)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("essential", &self.essential)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Declarative rules
// ---------------------------------------------------------------------------

/// Serializable rule description, as found in a run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub essential: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    CrossingRange { lo: u32, hi: u32 },
    DeterminantDivisibleBy { divisor: i64 },
    DeterminantPowerOfTwo {
        #[serde(default = "yes")]
        expected: bool,
    },
    ComponentCount { count: u32 },
    ObservationComponents,
    Symmetry { class: SymmetryClass },
    Hyperbolic {
        #[serde(default = "yes")]
        expected: bool,
    },
    SignatureParity { even: bool },
    FeatureRange { feature: String, lo: f64, hi: f64 },
}

fn yes() -> bool {
    true
}

impl RuleSpec {
    pub fn compile(&self) -> Rule {
        let rule = match &self.kind {
            RuleKind::CrossingRange { lo, hi } => Rule::crossing_range(*lo, *hi),
            RuleKind::DeterminantDivisibleBy { divisor } => Rule::determinant_divisible_by(*divisor),
            RuleKind::DeterminantPowerOfTwo { expected } => Rule::determinant_power_of_two(*expected),
            RuleKind::ComponentCount { count } => Rule::component_count(*count),
            RuleKind::ObservationComponents => Rule::observation_components(),
            RuleKind::Symmetry { class } => Rule::symmetry(*class),
            RuleKind::Hyperbolic { expected } => Rule::hyperbolic(*expected),
            RuleKind::SignatureParity { even } => Rule::signature_parity(*even),
            RuleKind::FeatureRange { feature, lo, hi } => Rule::feature_range(feature, *lo, *hi),
        };
        if self.essential { rule.essential() } else { rule }
    }
}

// ---------------------------------------------------------------------------
// Rule chain
// ---------------------------------------------------------------------------

/// Ordered conjunction of rules. An empty chain admits every record.
#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    rules: Vec<Rule>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Compile a chain from declarative specs.
    pub fn from_specs(specs: &[RuleSpec]) -> Self {
        Self {
            rules: specs.iter().map(RuleSpec::compile).collect(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the record satisfies every rule. Stops at the first failure.
    pub fn admits(&self, record: &InvariantRecord, ctx: &RuleContext<'_>) -> bool {
        self.rules.iter().all(|rule| rule.check(record, ctx))
    }

    /// Reject malformed chains: bad rule parameters or repeated rule names.
    pub fn validate(&self) -> ResolveResult<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if let Some(defect) = &rule.defect {
                return Err(ResolveError::InvalidRuleChain {
                    rule: rule.name.clone(),
                    message: defect.clone(),
                });
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(ResolveError::InvalidRuleChain {
                    rule: rule.name.clone(),
                    message: "rule appears twice in the chain".into(),
                });
            }
        }
        Ok(())
    }

    /// The chain without the named rule.
    pub fn without(&self, name: &str) -> Self {
        Self {
            rules: self
                .rules
                .iter()
                .filter(|r| r.name != name)
                .cloned()
                .collect(),
        }
    }

    /// Drop the last-declared non-essential rule. `None` if every rule is essential.
    pub fn drop_least_essential(&self) -> Option<(Self, String)> {
        let pos = self.rules.iter().rposition(|r| !r.essential)?;
        let mut rules = self.rules.clone();
        let dropped = rules.remove(pos);
        Some((Self { rules }, dropped.name))
    }
}

// ---------------------------------------------------------------------------
// Candidate filter
// ---------------------------------------------------------------------------

/// A record that survived filtering, with its catalog position.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'c> {
    pub position: usize,
    pub record: &'c InvariantRecord,
}

/// Reduce one catalog partition to the records a chain admits.
///
/// Records named in `exclude` are removed before any rule runs. Output
/// keeps catalog order.
pub fn filter_candidates<'c>(
    catalog: &'c InvariantCatalog,
    partition: Partition,
    chain: &RuleChain,
    ctx: &RuleContext<'_>,
    exclude: &BTreeSet<String>,
) -> Vec<Candidate<'c>> {
    catalog
        .partition(partition)
        .filter(|(_, r)| !exclude.contains(&r.name))
        .filter(|(_, r)| chain.admits(r, ctx))
        .map(|(position, record)| Candidate { position, record })
        .collect()
}
