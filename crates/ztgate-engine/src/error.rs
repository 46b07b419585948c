//! Engine errors
//!
//! Any error returned by [`crate::ZeroTrustEngine::evaluate_access`] must be
//! treated by the caller as a deny.

use thiserror::Error;
use ztgate_common::CommonError;
use ztgate_policy::PolicyError;
use ztgate_threat::ThreatError;

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Request rejected before evaluation
    #[error("invalid request: {0}")]
    Request(#[from] CommonError),

    /// Policy evaluation or administration failed
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Threat subsystem failed
    #[error("threat error: {0}")]
    Threat(#[from] ThreatError),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Audit collaborator failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Sink refused or could not persist the event
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}
