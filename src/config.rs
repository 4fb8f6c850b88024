//! Run-level configuration.
//!
//! Everything a run needs is read once at start-up into a [`RunConfig`] and
//! threaded through the components by reference. The formula coefficients
//! live in an opaque [`ParamBag`] that the core only ever reads.

use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::assignment::AssignConfig;
use crate::resample::ResamplingConfig;
use crate::resolve::{HypothesisConfig, ResolverConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing configuration key: {key}")]
    #[diagnostic(
        code(knotfit::config::missing_key),
        help("Add the key to the [params] table of the run configuration.")
    )]
    MissingKey { key: String },

    #[error("configuration key {key} is not a {expected}")]
    #[diagnostic(
        code(knotfit::config::wrong_type),
        help("Check the value type in the run configuration.")
    )]
    WrongType { key: String, expected: String },

    #[error("configuration parse error: {message}")]
    #[diagnostic(
        code(knotfit::config::parse),
        help("The run configuration must be valid TOML (or JSON for parameter bags).")
    )]
    Parse { message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(knotfit::config::invalid))]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Parameter bag
// ---------------------------------------------------------------------------

/// Immutable nested key-value parameters, addressed by dotted paths.
///
/// ```
/// use knotfit::config::ParamBag;
///
/// let bag = ParamBag::from_toml_str("[formula]\nslope = 2.5\n").unwrap();
/// assert_eq!(bag.get_f64("formula.slope").unwrap(), 2.5);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(transparent)]
pub struct ParamBag(Value);

impl ParamBag {
    pub fn new(root: Value) -> Self {
        Self(root)
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let value: Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        Ok(Self(value))
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        Ok(Self(value))
    }

    /// Raw lookup of a dotted path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .filter(|part| !part.is_empty())
            .try_fold(&self.0, |node, part| node.get(part))
    }

    pub fn get_f64(&self, key: &str) -> ConfigResult<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| wrong_type(key, "number"))
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> ConfigResult<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| wrong_type(key, "number")),
        }
    }

    pub fn get_u64(&self, key: &str) -> ConfigResult<u64> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| wrong_type(key, "non-negative integer"))
    }

    pub fn get_str(&self, key: &str) -> ConfigResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| wrong_type(key, "string"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn require(&self, key: &str) -> ConfigResult<&Value> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey { key: key.into() })
    }
}

fn wrong_type(key: &str, expected: &str) -> ConfigError {
    ConfigError::WrongType {
        key: key.into(),
        expected: expected.into(),
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Complete configuration for one analysis run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub resolver: ResolverConfig,
    pub assignment: AssignConfig,
    pub resampling: ResamplingConfig,
    pub hypothesis: HypothesisConfig,
    pub params: ParamBag,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML run configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject settings no run could use.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.resolver.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "resolver.top_k must be >= 1".into(),
            });
        }
        self.resampling
            .validate()
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_lookup() {
        let bag = ParamBag::from_json_str(r#"{"formula": {"slope": 1.5, "name": "log"}, "n": 3}"#)
            .unwrap();
        assert_eq!(bag.get_f64("formula.slope").unwrap(), 1.5);
        assert_eq!(bag.get_str("formula.name").unwrap(), "log");
        assert_eq!(bag.get_u64("n").unwrap(), 3);
        assert_eq!(bag.get_f64_or("formula.intercept", 0.25).unwrap(), 0.25);
        assert!(matches!(
            bag.get_f64("formula.missing"),
            Err(ConfigError::MissingKey { .. })
        ));
        assert!(matches!(
            bag.get_f64("formula.name"),
            Err(ConfigError::WrongType { .. })
        ));
    }

    #[test]
    fn run_config_defaults_when_empty() {
        let config = RunConfig::from_toml_str("").unwrap();
        assert_eq!(config.resolver.top_k, 1);
        assert_eq!(config.resampling.trials, 10_000);
        assert!(!config.assignment.distinct_base_names);
    }

    #[test]
    fn run_config_full_document() {
        let text = r#"
            [resolver]
            top_k = 3

            [assignment]
            distinct_base_names = true
            on_ambiguous = "abort"

            [resampling]
            trials = 500
            seed = 7
            confidence = 0.9
            tail = "two_sided"

            [hypothesis]
            partition = "links"
            feature = "crossing_number"
            tie_break = ["crossing_number", "name"]
            fallback = "drop_least_essential"

            [[hypothesis.rules]]
            kind = "determinant_divisible_by"
            divisor = 4

            [[hypothesis.rules]]
            kind = "crossing_range"
            lo = 4
            hi = 12
            essential = true

            [params.formula]
            slope = 2.0
            anchor = 0.511
        "#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.resolver.top_k, 3);
        assert!(config.assignment.distinct_base_names);
        assert_eq!(config.resampling.trials, 500);
        assert_eq!(config.hypothesis.rules.len(), 2);
        assert_eq!(config.params.get_f64("formula.anchor").unwrap(), 0.511);
    }

    #[test]
    fn run_config_rejects_zero_top_k() {
        let err = RunConfig::from_toml_str("[resolver]\ntop_k = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[resampling]\nseed = 99\n").unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.resampling.seed, 99);
    }
}
