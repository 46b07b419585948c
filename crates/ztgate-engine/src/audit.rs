//! Audit collaborator contract
//!
//! One [`AuditEvent`] is submitted per decision. The engine supplies every
//! field the audit store needs to chain events; computing and verifying the
//! chain belongs to the store.

use crate::risk::RiskFactors;
use crate::{AccessDecision, AuditError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::net::IpAddr;
use ztgate_common::AccessRequest;

/// Record of one access decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub request_id: String,
    pub user_id: Option<String>,
    pub device_id: String,
    pub ip: IpAddr,
    pub resource: String,
    pub action: String,
    pub allowed: bool,
    pub requires_mfa: bool,
    pub risk_score: f64,
    pub factors: RiskFactors,
    pub session_ttl_secs: u64,
    pub reason: String,
    pub matched_policies: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build the event for a decision on `request`
    pub fn from_decision(request: &AccessRequest, decision: &AccessDecision) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            device_id: request.device_id.clone(),
            ip: request.ip,
            resource: request.resource.clone(),
            action: request.action.clone(),
            allowed: decision.allowed,
            requires_mfa: decision.requires_mfa,
            risk_score: decision.risk_score,
            factors: decision.factors,
            session_ttl_secs: decision.session_ttl.as_secs(),
            reason: decision.reason.clone(),
            matched_policies: decision.matched_policies.clone(),
            timestamp: decision.timestamp,
        }
    }

    /// Canonical byte encoding for hash chaining.
    ///
    /// Every field is written in declaration order. Strings are length
    /// prefixed, numbers are big-endian, floats use their IEEE-754 bits and
    /// the timestamp is nanoseconds since the epoch.
    pub fn hash_material(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        put_str(&mut out, &self.event_id);
        put_str(&mut out, &self.request_id);
        match &self.user_id {
            Some(user) => {
                out.push(1);
                put_str(&mut out, user);
            }
            None => out.push(0),
        }
        put_str(&mut out, &self.device_id);
        put_str(&mut out, &self.ip.to_string());
        put_str(&mut out, &self.resource);
        put_str(&mut out, &self.action);
        out.push(u8::from(self.allowed));
        out.push(u8::from(self.requires_mfa));
        for v in [
            self.risk_score,
            self.factors.device_trust,
            self.factors.behavior_risk,
            self.factors.threat_level,
        ] {
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        out.extend_from_slice(&self.session_ttl_secs.to_be_bytes());
        put_str(&mut out, &self.reason);
        out.extend_from_slice(&(self.matched_policies.len() as u64).to_be_bytes());
        for policy in &self.matched_policies {
            put_str(&mut out, policy);
        }
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1000));
        out.extend_from_slice(&nanos.to_be_bytes());
        out
    }

    /// SHA-256 hex of [`Self::hash_material`]
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.hash_material()))
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Audit collaborator
pub trait AuditSink: Send + Sync {
    /// Persist one event
    fn log_event(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Bounded in-memory audit log, oldest events dropped first
pub struct AuditLogger {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl AuditLogger {
    /// Create logger keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Events for `user_id`, oldest first
    pub fn events_for_user(&self, user_id: &str) -> Vec<AuditEvent> {
        self.query(|e| e.user_id.as_deref() == Some(user_id))
    }

    /// Allowed or denied events, oldest first
    pub fn events_by_decision(&self, allowed: bool) -> Vec<AuditEvent> {
        self.query(|e| e.allowed == allowed)
    }

    /// Events in `[from, to)`, oldest first
    pub fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<AuditEvent> {
        self.query(|e| e.timestamp >= from && e.timestamp < to)
    }

    /// Latest `n` events, newest first
    pub fn recent(&self, n: usize) -> Vec<AuditEvent> {
        self.events.read().iter().rev().take(n).cloned().collect()
    }

    fn query(&self, filter: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events.read().iter().filter(|e| filter(e)).cloned().collect()
    }

    /// Stored events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl AuditSink for AuditLogger {
    fn log_event(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(user: Option<&str>, allowed: bool, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            event_id: "e-1".into(),
            request_id: "r-1".into(),
            user_id: user.map(str::to_string),
            device_id: "dev-1".into(),
            ip: "10.0.0.1".parse().unwrap(),
            resource: "orders".into(),
            action: "read".into(),
            allowed,
            requires_mfa: false,
            risk_score: 0.32,
            factors: RiskFactors {
                device_trust: 0.6,
                behavior_risk: 0.5,
                threat_level: 0.0,
            },
            session_ttl_secs: 1200,
            reason: "allowed by p/r".into(),
            matched_policies: vec!["p".into()],
            timestamp: at,
        }
    }

    #[test]
    fn test_hash_material_is_stable_and_sensitive() {
        let now = Utc::now();
        let a = event(Some("alice"), true, now);
        assert_eq!(a.hash_material(), a.clone().hash_material());
        assert_eq!(a.content_hash().len(), 64);

        let mut denied = a.clone();
        denied.allowed = false;
        assert_ne!(a.content_hash(), denied.content_hash());

        let anonymous = event(None, true, now);
        assert_ne!(a.hash_material(), anonymous.hash_material());

        let mut shifted = a.clone();
        shifted.resource = "orders:".into();
        shifted.action = "ead".into();
        assert_ne!(a.hash_material(), shifted.hash_material());
    }

    #[test]
    fn test_logger_queries() {
        let logger = AuditLogger::new(10);
        let now = Utc::now();
        logger.log_event(event(Some("alice"), true, now - Duration::minutes(10))).unwrap();
        logger.log_event(event(Some("bob"), false, now - Duration::minutes(5))).unwrap();
        logger.log_event(event(Some("alice"), false, now)).unwrap();

        assert_eq!(logger.events_for_user("alice").len(), 2);
        assert_eq!(logger.events_by_decision(false).len(), 2);
        assert_eq!(logger.events_between(now - Duration::minutes(6), now).len(), 1);
        assert_eq!(logger.recent(1)[0].user_id.as_deref(), Some("alice"));
        assert_eq!(logger.recent(1)[0].timestamp, now);
    }

    #[test]
    fn test_logger_is_bounded() {
        let logger = AuditLogger::new(2);
        let now = Utc::now();
        for i in 0..5 {
            logger.log_event(event(None, true, now + Duration::seconds(i))).unwrap();
        }
        assert_eq!(logger.len(), 2);
        assert_eq!(logger.recent(2)[1].timestamp, now + Duration::seconds(3));
    }
}
