//! Error types for the resampling harness.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from permutation, bootstrap and cross-validation runs.
#[derive(Debug, Error, Diagnostic)]
pub enum ResampleError {
    #[error("paired samples differ in length: {independent} vs {dependent}")]
    #[diagnostic(
        code(knotfit::resample::length_mismatch),
        help("The independent and dependent samples must pair up one to one.")
    )]
    LengthMismatch { independent: usize, dependent: usize },

    #[error("empty sample")]
    #[diagnostic(
        code(knotfit::resample::empty),
        help("Resampling needs at least one observation.")
    )]
    EmptySample,

    #[error("statistic undefined on the observed data: {message}")]
    #[diagnostic(
        code(knotfit::resample::undefined_statistic),
        help("The statistic cannot be computed on the original sample (zero variance, too few points).")
    )]
    UndefinedStatistic { message: String },

    #[error("insufficient sample: {available} observations, {required} required")]
    #[diagnostic(
        code(knotfit::resample::insufficient_sample),
        help("The model has too many free parameters for this many observations.")
    )]
    InsufficientSample { available: usize, required: usize },

    #[error("invalid resampling configuration: {message}")]
    #[diagnostic(code(knotfit::resample::invalid_config))]
    InvalidConfig { message: String },
}

pub type ResampleResult<T> = std::result::Result<T, ResampleError>;
