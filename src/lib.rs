// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # knotfit
//!
//! Constrained candidate resolution over knot and link invariant catalogs,
//! with a resampling harness for checking whether a fit is significant.
//!
//! ## Architecture
//!
//! - **Catalog** (`catalog`): immutable, name-indexed invariant records split
//!   into knot and link partitions
//! - **Rules** (`rules`): named admissibility predicates composed into chains
//! - **Resolver** (`resolve`): filter, rank by distance, break ties in a
//!   declared order, and fall back visibly when filtering empties the set
//! - **Assignment** (`assignment`): per-observation results and the run summary
//! - **Resampling** (`resample`): seeded permutation test, bootstrap, and
//!   leave-one-out cross-validation
//! - **Run** (`run`): facade that threads catalog, parameters and config
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use knotfit::catalog::InvariantCatalog;
//! use knotfit::config::RunConfig;
//! use knotfit::run::AnalysisRun;
//! use knotfit::target::{LogLinearFormula, Observation};
//!
//! let catalog = InvariantCatalog::from_json_str(&std::fs::read_to_string("knots.json").unwrap()).unwrap();
//! let config = RunConfig::load("run.toml".as_ref()).unwrap();
//! let run = AnalysisRun::new(Arc::new(catalog), config).unwrap();
//!
//! let observations = vec![Observation::new("muon", 105.66), Observation::new("tau", 1776.86)];
//! let report = run.report(&observations, &LogLinearFormula::default(), true).unwrap();
//! println!("{} unresolved", report.summary.unresolved_count);
//! ```

pub mod assignment;
pub mod catalog;
pub mod config;
pub mod error;
pub mod resample;
pub mod resolve;
pub mod rules;
pub mod run;
pub mod stats;
pub mod target;
