//! Policy engine errors

use thiserror::Error;

/// Policy engine error type
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Policy not found
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Policy id already in use
    #[error("policy already exists: {0}")]
    DuplicatePolicy(String),

    /// Invalid policy
    #[error("invalid policy {policy_id}: {reason}")]
    InvalidPolicy {
        /// Offending policy
        policy_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Evaluation context cannot be trusted
    #[error("invalid evaluation context: {0}")]
    InvalidContext(String),

    /// IO error while loading a policy file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed policy document
    #[error("policy document error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PolicyError {
    pub(crate) fn invalid(policy_id: &str, reason: impl Into<String>) -> Self {
        PolicyError::InvalidPolicy {
            policy_id: policy_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for the policy engine
pub type PolicyResult<T> = Result<T, PolicyError>;
