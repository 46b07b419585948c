//! Threat subsystem errors

use crate::IncidentStatus;
use thiserror::Error;

/// Threat subsystem error type
#[derive(Error, Debug)]
pub enum ThreatError {
    /// A detection engine could not analyse a request
    #[error("detection engine {engine} failed: {reason}")]
    Engine {
        /// Engine name
        engine: &'static str,
        /// Failure detail
        reason: String,
    },

    /// A feed source could not be fetched or parsed
    #[error("feed {source_name} failed: {reason}")]
    Feed {
        /// Feed source name
        source_name: String,
        /// Failure detail
        reason: String,
    },

    /// Incident status change not permitted
    #[error("incident {incident_id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Incident id
        incident_id: String,
        /// Current status
        from: IncidentStatus,
        /// Requested status
        to: IncidentStatus,
    },

    /// Incident not found
    #[error("incident not found: {0}")]
    IncidentNotFound(String),

    /// Configuration rejected
    #[error("invalid threat configuration: {0}")]
    InvalidConfig(String),
}

impl ThreatError {
    pub(crate) fn feed(source_name: &str, reason: impl ToString) -> Self {
        ThreatError::Feed {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for the threat subsystem
pub type ThreatResult<T> = Result<T, ThreatError>;
