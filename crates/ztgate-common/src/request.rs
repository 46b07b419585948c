//! Access request model

use crate::{CommonError, CommonResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Context key carrying comma separated role names
pub const CONTEXT_ROLES: &str = "roles";
/// Context key carrying the caller's resolved location
pub const CONTEXT_LOCATION: &str = "location";
/// Context key carrying the destination or referring domain
pub const CONTEXT_DOMAIN: &str = "domain";

/// A single request to be authorized.
///
/// Immutable input to every evaluator. The engine never persists it; only
/// the derived audit event leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Correlation id, echoed in the decision and audit event
    pub request_id: String,
    /// Authenticated user, `None` for anonymous requests
    pub user_id: Option<String>,
    /// Client supplied device identifier
    pub device_id: String,
    /// Source address
    pub ip: IpAddr,
    /// Raw user agent
    pub user_agent: String,
    /// Target resource
    pub resource: String,
    /// Action verb
    pub action: String,
    /// When the request was received
    pub timestamp: DateTime<Utc>,
    /// Free-form attributes from the authentication layer
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl AccessRequest {
    /// Create an anonymous request stamped with the current time
    pub fn new(
        device_id: impl Into<String>,
        ip: IpAddr,
        user_agent: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            device_id: device_id.into(),
            ip,
            user_agent: user_agent.into(),
            resource: resource.into(),
            action: action.into(),
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Attach the authenticated user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the request time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Check the fields every evaluator relies on
    pub fn validate(&self) -> CommonResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(CommonError::MissingField("device_id"));
        }
        if self.resource.trim().is_empty() {
            return Err(CommonError::MissingField("resource"));
        }
        if self.action.trim().is_empty() {
            return Err(CommonError::MissingField("action"));
        }
        if let Some(user) = &self.user_id {
            if user.trim().is_empty() {
                return Err(CommonError::InvalidField {
                    field: "user_id",
                    reason: "empty user id; use None for anonymous requests".to_string(),
                });
            }
        }
        Ok(())
    }

    /// `resource:action` key used by behavior profiles
    pub fn action_key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// Roles asserted by the authentication layer
    pub fn roles(&self) -> Vec<&str> {
        self.context
            .get(CONTEXT_ROLES)
            .map(|r| r.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Resolved location, if the caller supplied one
    pub fn location(&self) -> Option<&str> {
        self.context.get(CONTEXT_LOCATION).map(String::as_str)
    }

    /// Domain named in the request context, if any
    pub fn domain(&self) -> Option<&str> {
        self.context.get(CONTEXT_DOMAIN).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AccessRequest {
        AccessRequest::new("dev-1", "10.0.0.1".parse().unwrap(), "Mozilla/5.0", "orders", "read")
    }

    #[test]
    fn test_validate_requires_device() {
        let mut req = request();
        assert!(req.validate().is_ok());

        req.device_id = "  ".into();
        assert_eq!(req.validate(), Err(CommonError::MissingField("device_id")));
    }

    #[test]
    fn test_empty_user_rejected() {
        let req = request().with_user("");
        assert!(matches!(req.validate(), Err(CommonError::InvalidField { field: "user_id", .. })));
    }

    #[test]
    fn test_roles_and_location() {
        let req = request()
            .with_context(CONTEXT_ROLES, "trader, admin,,")
            .with_context(CONTEXT_LOCATION, "GB");

        assert_eq!(req.roles(), vec!["trader", "admin"]);
        assert_eq!(req.location(), Some("GB"));
        assert_eq!(req.action_key(), "orders:read");
    }

    #[test]
    fn test_context_defaults_when_absent_in_json() {
        let json = r#"{
            "request_id": "r1",
            "user_id": null,
            "device_id": "d1",
            "ip": "192.0.2.7",
            "user_agent": "curl/8.0",
            "resource": "quotes",
            "action": "read",
            "timestamp": "2026-03-04T12:00:00Z"
        }"#;
        let req: AccessRequest = serde_json::from_str(json).unwrap();
        assert!(req.context.is_empty());
        assert!(req.user_id.is_none());
    }
}
