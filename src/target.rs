//! Target computation: observation + formula parameters → target invariant.
//!
//! Formulas are pure. The same observation under the same [`ParamBag`]
//! always yields the same [`TargetValue`], which the resampling harness
//! relies on for reproducibility.

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, ParamBag};

#[derive(Debug, Error, Diagnostic)]
pub enum TargetError {
    #[error("target undefined for observation \"{observation}\": {message}")]
    #[diagnostic(
        code(knotfit::target::undefined),
        help("The formula cannot be evaluated for this observation. Check its value and the formula domain.")
    )]
    UndefinedTarget { observation: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

pub type TargetResult<T> = std::result::Result<T, TargetError>;

/// One observed quantity (e.g. a particle and its measured mass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub value: f64,
    /// Additional measured quantities, keyed by name.
    #[serde(default)]
    pub aux: BTreeMap<String, f64>,
    /// Component count the observation calls for, if it constrains one.
    #[serde(default)]
    pub components: Option<u32>,
}

impl Observation {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
            aux: BTreeMap::new(),
            components: None,
        }
    }

    pub fn with_aux(mut self, key: impl Into<String>, value: f64) -> Self {
        self.aux.insert(key.into(), value);
        self
    }

    pub fn with_components(mut self, components: u32) -> Self {
        self.components = Some(components);
        self
    }
}

/// Primary target plus optional auxiliary targets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetValue {
    pub primary: f64,
    #[serde(default)]
    pub auxiliary: BTreeMap<String, f64>,
}

impl TargetValue {
    pub fn scalar(primary: f64) -> Self {
        Self {
            primary,
            auxiliary: BTreeMap::new(),
        }
    }

    pub fn with_aux(mut self, key: impl Into<String>, value: f64) -> Self {
        self.auxiliary.insert(key.into(), value);
        self
    }

    /// Reject NaN or infinite components; no candidate can be nearest to them.
    pub fn ensure_finite(self, observation: &str) -> TargetResult<Self> {
        if !self.primary.is_finite() {
            return Err(TargetError::UndefinedTarget {
                observation: observation.to_string(),
                message: format!("primary target is not finite ({})", self.primary),
            });
        }
        if let Some((key, value)) = self.auxiliary.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TargetError::UndefinedTarget {
                observation: observation.to_string(),
                message: format!("auxiliary target '{key}' is not finite ({value})"),
            });
        }
        Ok(self)
    }
}

/// A parametrized formula mapping an observation to its target.
pub trait TargetFormula: Send + Sync {
    fn target(&self, observation: &Observation, params: &ParamBag) -> TargetResult<TargetValue>;

    /// Numeric parameters the formula reads, checked once before any target
    /// is computed.
    fn required_params(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> TargetFormula for F
where
    F: Fn(&Observation, &ParamBag) -> TargetResult<TargetValue> + Send + Sync,
{
    fn target(&self, observation: &Observation, params: &ParamBag) -> TargetResult<TargetValue> {
        self(observation, params)
    }
}

/// `target = slope * ln(value / anchor) + intercept`, coefficients read from
/// `{prefix}.slope`, `{prefix}.anchor` and `{prefix}.intercept` (default 0).
///
/// Auxiliary observation values pass through unchanged as auxiliary targets.
#[derive(Debug, Clone)]
pub struct LogLinearFormula {
    prefix: String,
}

impl LogLinearFormula {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.prefix)
        }
    }
}

impl Default for LogLinearFormula {
    fn default() -> Self {
        Self::new("formula")
    }
}

impl TargetFormula for LogLinearFormula {
    fn required_params(&self) -> Vec<String> {
        vec![self.key("slope"), self.key("anchor")]
    }

    fn target(&self, observation: &Observation, params: &ParamBag) -> TargetResult<TargetValue> {
        let slope = params.get_f64(&self.key("slope"))?;
        let anchor = params.get_f64(&self.key("anchor"))?;
        let intercept = params.get_f64_or(&self.key("intercept"), 0.0)?;

        if !(observation.value > 0.0 && anchor > 0.0) {
            return Err(TargetError::UndefinedTarget {
                observation: observation.id.clone(),
                message: format!(
                    "log-linear formula needs positive value and anchor (value {}, anchor {anchor})",
                    observation.value
                ),
            });
        }

        let primary = slope * (observation.value / anchor).ln() + intercept;
        Ok(TargetValue {
            primary,
            auxiliary: observation.aux.clone(),
        })
    }
}
