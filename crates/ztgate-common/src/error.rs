//! Error types shared across ztgate crates

use thiserror::Error;

/// Request validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A field the evaluators depend on is empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but unusable
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type for ztgate common
pub type CommonResult<T> = Result<T, CommonError>;
