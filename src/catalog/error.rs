//! Rich diagnostic error types for the invariant catalog.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from catalog construction and lookup.
#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("record not found: \"{name}\"")]
    #[diagnostic(
        code(knotfit::catalog::not_found),
        help(
            "No record with this name exists in the catalog partition. \
             Knot and link names live in separate namespaces, so check that \
             you are looking in the right partition."
        )
    )]
    NotFound { name: String },

    #[error("duplicate record name \"{name}\" in the {partition} partition")]
    #[diagnostic(
        code(knotfit::catalog::duplicate),
        help(
            "Names must be unique within a partition. Deduplicate the rows \
             before handing them to the catalog."
        )
    )]
    DuplicateName { name: String, partition: String },

    #[error("invalid record \"{name}\": {message}")]
    #[diagnostic(
        code(knotfit::catalog::invalid_record),
        help(
            "Every record needs a non-empty name and at least one component. \
             Crossing number 0 is allowed (the unknot)."
        )
    )]
    InvalidRecord { name: String, message: String },

    #[error("catalog parse error: {message}")]
    #[diagnostic(
        code(knotfit::catalog::parse),
        help(
            "The catalog must be a JSON array of records. Numeric fields that \
             could not be parsed should already be normalized to null."
        )
    )]
    Parse { message: String },
}

/// Convenience alias for catalog operation results.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
