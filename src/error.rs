//! Top-level diagnostic error type.
//!
//! Each subsystem defines its own miette-annotated error; [`KnotFitError`]
//! wraps them so codes and help text survive to the user.

use miette::Diagnostic;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::resample::ResampleError;
use crate::resolve::ResolveError;
use crate::target::TargetError;

#[derive(Debug, Error, Diagnostic)]
pub enum KnotFitError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resample(#[from] ResampleError),
}

pub type KnotFitResult<T> = std::result::Result<T, KnotFitError>;
