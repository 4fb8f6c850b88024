//! Fixed-schema catalog records.
//!
//! One [`InvariantRecord`] per knot or link. Fields that the ingestion step
//! could not parse are represented as `None` instead of a sentinel value.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// Catalog partition. Knots and links are disjoint namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Records with exactly one component.
    #[default]
    Knots,
    /// Records with two or more components.
    Links,
    /// Both partitions. Names may collide across them.
    All,
}

impl Partition {
    /// Whether a record with the given component count belongs here.
    pub fn admits(self, component_count: u32) -> bool {
        match self {
            Self::Knots => component_count == 1,
            Self::Links => component_count > 1,
            Self::All => true,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Knots => write!(f, "knots"),
            Self::Links => write!(f, "links"),
            Self::All => write!(f, "all"),
        }
    }
}

// ---------------------------------------------------------------------------
// Symmetry class
// ---------------------------------------------------------------------------

/// Categorical symmetry type of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymmetryClass {
    Amphicheiral,
    Chiral,
    Reversible,
    #[default]
    Unknown,
}

impl SymmetryClass {
    /// Parse a symmetry label. Unrecognised labels map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "amphicheiral" | "fully amphicheiral" | "negative amphicheiral"
            | "positive amphicheiral" => Self::Amphicheiral,
            "chiral" => Self::Chiral,
            "reversible" => Self::Reversible,
            _ => Self::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for SymmetryClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.map(|s| Self::parse(&s)).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One knot or link with its invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantRecord {
    pub name: String,
    pub component_count: u32,
    pub crossing_number: u32,
    #[serde(default)]
    pub determinant: i64,
    #[serde(default)]
    pub signature: i64,
    /// `None` when the record is not hyperbolic (or the volume is unknown).
    #[serde(default, deserialize_with = "volume_or_none")]
    pub hyperbolic_volume: Option<f64>,
    /// Polynomial-derived scalars keyed by name. Undefined values are absent.
    #[serde(default, deserialize_with = "finite_features")]
    pub features: BTreeMap<String, f64>,
    #[serde(default)]
    pub symmetry_class: SymmetryClass,
}

impl InvariantRecord {
    pub fn new(name: impl Into<String>, component_count: u32, crossing_number: u32) -> Self {
        Self {
            name: name.into(),
            component_count,
            crossing_number,
            determinant: 0,
            signature: 0,
            hyperbolic_volume: None,
            features: BTreeMap::new(),
            symmetry_class: SymmetryClass::Unknown,
        }
    }

    pub fn with_determinant(mut self, determinant: i64) -> Self {
        self.determinant = determinant;
        self
    }

    pub fn with_signature(mut self, signature: i64) -> Self {
        self.signature = signature;
        self
    }

    /// Set the hyperbolic volume. Zero and non-finite volumes mean "not hyperbolic".
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.hyperbolic_volume = normalize_volume(volume);
        self
    }

    /// Add a polynomial-derived feature. Non-finite values are dropped.
    pub fn with_feature(mut self, key: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.features.insert(key.into(), value);
        }
        self
    }

    pub fn with_symmetry(mut self, symmetry: SymmetryClass) -> Self {
        self.symmetry_class = symmetry;
        self
    }

    pub fn is_knot(&self) -> bool {
        self.component_count == 1
    }

    pub fn is_hyperbolic(&self) -> bool {
        self.hyperbolic_volume.is_some()
    }

    /// Look up a polynomial-derived feature.
    pub fn feature(&self, key: &str) -> Option<f64> {
        self.features.get(key).copied()
    }

    /// The partition this record lives in.
    pub fn partition(&self) -> Partition {
        if self.is_knot() {
            Partition::Knots
        } else {
            Partition::Links
        }
    }

    /// Name without secondary disambiguation suffixes.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }
}

/// Strip a trailing `{...}` orientation suffix and any `#n` variant suffix.
///
/// `L10a140{1}` and `L10a140{0,1}` both map to `L10a140`; `K8a3#2` maps to `K8a3`.
pub fn base_name(name: &str) -> &str {
    let mut base = name;
    if base.ends_with('}') {
        if let Some(open) = base.rfind('{') {
            base = &base[..open];
        }
    }
    if let Some(hash) = base.rfind('#') {
        let suffix = &base[hash + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            base = &base[..hash];
        }
    }
    base
}

fn normalize_volume(volume: f64) -> Option<f64> {
    if volume.is_finite() && volume > 0.0 {
        Some(volume)
    } else {
        None
    }
}

fn volume_or_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(normalize_volume))
}

fn finite_features<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Option<f64>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| v.filter(|x| x.is_finite()).map(|x| (k, x)))
        .collect())
}
