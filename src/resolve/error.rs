//! Error types for candidate resolution.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from building or running a resolution request.
///
/// `Unresolved` is not an error: it is a normal resolution outcome.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("invalid rule chain at rule '{rule}': {message}")]
    #[diagnostic(
        code(knotfit::resolve::invalid_rule_chain),
        help("Fix the rule parameters before starting the run; malformed chains are never evaluated.")
    )]
    InvalidRuleChain { rule: String, message: String },

    #[error("invalid tie-break order: {message}")]
    #[diagnostic(
        code(knotfit::resolve::invalid_tie_break),
        help(
            "Declare at least one tie-break key, each at most once. Ending the \
             order with `name` (within one partition) makes it total."
        )
    )]
    InvalidTieBreak { message: String },

    #[error("ambiguous selection: {} candidates tie under the declared order ({})", .tied.len(), .tied.join(", "))]
    #[diagnostic(
        code(knotfit::resolve::ambiguous),
        help(
            "The tie-break order did not separate the best candidates. Add a \
             discriminating key such as `name` or `catalog_order`."
        )
    )]
    AmbiguousSelection { tied: Vec<String> },
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
