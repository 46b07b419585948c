//! Access Decision Orchestrator
//!
//! ```text
//! request ─► validate ─► blocked? ──yes──► deny
//!                           │ no
//!              ┌────────────┼─────────────┐
//!              ▼            ▼             ▼
//!         device trust  behavior risk  threat level
//!              └────────────┼─────────────┘
//!                           ▼
//!                      risk score ─► policy ─► merge ─► profile + audit
//! ```
//!
//! Any evaluator error aborts with no decision. Callers treat that as deny.

use crate::audit::{AuditEvent, AuditLogger, AuditSink};
use crate::behavior::BehaviorAnalyzer;
use crate::device::DeviceTrustEvaluator;
use crate::risk::{calculate_risk_score, RiskFactors};
use crate::ttl::TtlCalculator;
use crate::{EngineConfig, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ztgate_common::{AccessRequest, LocalClock};
use ztgate_policy::{Obligation, PolicyContext, PolicyEngine};
use ztgate_threat::{FeedSource, ThreatAssessment, ThreatDetector, ThreatType};

/// MFA is demanded above this risk regardless of policy
pub const MFA_RISK_THRESHOLD: f64 = 0.5;

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Echo of the request id
    pub request_id: String,
    /// Access granted
    pub allowed: bool,
    /// Second factor required
    pub requires_mfa: bool,
    /// Session lifetime to grant
    pub session_ttl: Duration,
    /// Composite risk
    pub risk_score: f64,
    /// Inputs to the composite risk
    pub factors: RiskFactors,
    /// Matching policies, evaluation order
    pub matched_policies: Vec<String>,
    /// Firing rules as `policy_id/rule_id`
    pub matched_rules: Vec<String>,
    /// Threat verdict for the request
    pub threat: ThreatAssessment,
    /// Non-decisive actions for the caller
    pub obligations: Vec<Obligation>,
    /// Why
    pub reason: String,
    /// Decided at
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    blocked: AtomicU64,
    errors: AtomicU64,
    audit_failures: AtomicU64,
}

/// Orchestrator statistics
#[derive(Debug, Clone, Serialize)]
pub struct DecisionStats {
    pub evaluations: u64,
    pub allowed: u64,
    pub denied: u64,
    pub blocked: u64,
    pub errors: u64,
    pub audit_failures: u64,
    pub known_devices: usize,
    pub behavior_profiles: usize,
}

/// Zero trust access engine
pub struct ZeroTrustEngine {
    config: EngineConfig,
    clock: LocalClock,
    devices: DeviceTrustEvaluator,
    behavior: BehaviorAnalyzer,
    threats: Arc<ThreatDetector>,
    policies: PolicyEngine,
    ttl: TtlCalculator,
    audit: Arc<dyn AuditSink>,
    counters: Counters,
}

impl ZeroTrustEngine {
    /// Create engine with the default detector and an in-memory audit log
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let threats = Arc::new(ThreatDetector::new(config.threat.clone())?);
        Self::with_threat_detector(config, threats)
    }

    /// Create engine around an existing detector
    pub fn with_threat_detector(
        config: EngineConfig,
        threats: Arc<ThreatDetector>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let clock = config.ttl.clock()?;
        Ok(Self {
            clock,
            devices: DeviceTrustEvaluator::new(config.device.clone()),
            behavior: BehaviorAnalyzer::new(config.behavior.clone(), clock),
            threats,
            policies: PolicyEngine::new(),
            ttl: TtlCalculator::new(&config.ttl)?,
            audit: Arc::new(AuditLogger::new(config.audit_capacity)),
            counters: Counters::default(),
            config,
        })
    }

    /// Replace the audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Evaluate one request
    pub fn evaluate_access(&self, request: &AccessRequest) -> EngineResult<AccessDecision> {
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);
        match self.decide(request) {
            Ok(decision) => {
                let counter = if decision.allowed {
                    &self.counters.allowed
                } else {
                    &self.counters.denied
                };
                counter.fetch_add(1, Ordering::Relaxed);
                self.submit_audit(request, &decision);
                info!(
                    request_id = %decision.request_id,
                    user_id = ?request.user_id,
                    ip = %request.ip,
                    allowed = decision.allowed,
                    requires_mfa = decision.requires_mfa,
                    risk = decision.risk_score,
                    ttl_secs = decision.session_ttl.as_secs(),
                    "Access decision"
                );
                Ok(decision)
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %request.request_id, error = %e, "Access evaluation failed");
                Err(e)
            }
        }
    }

    fn decide(&self, request: &AccessRequest) -> EngineResult<AccessDecision> {
        request.validate()?;

        let threat = self.threats.detect_threats(request);
        if threat.threat_type == Some(ThreatType::BlockedSource) {
            self.counters.blocked.fetch_add(1, Ordering::Relaxed);
            return Ok(self.blocked_decision(request, threat));
        }

        let device_trust = self.devices.evaluate_device_trust(request)?;
        let user_id = request.user_id.as_deref();
        let behavior_risk = self.behavior.evaluate_behavior_risk(user_id, request)?;
        let factors = RiskFactors {
            device_trust,
            behavior_risk,
            threat_level: threat.score,
        };
        let risk = calculate_risk_score(factors);
        debug!(
            request_id = %request.request_id,
            device_trust,
            behavior_risk,
            threat = threat.score,
            risk,
            "Risk scored"
        );

        let ctx = PolicyContext::new(request, risk, device_trust).with_clock(self.clock);
        let policy = self.policies.evaluate(&ctx)?;

        let within_risk = risk <= self.config.risk_threshold;
        let allowed = within_risk && policy.allowed && !threat.should_block;
        let requires_mfa =
            risk > MFA_RISK_THRESHOLD || policy.requires_mfa || self.config.force_mfa;

        let mut session_ttl = self.ttl.compute_ttl(
            risk,
            self.config.ttl.strategy,
            request.timestamp,
            self.threats.system_threat_level(),
        );
        if let Some(cap) = policy.session_ttl {
            session_ttl = self.ttl.clamp(session_ttl.min(cap));
        }

        let reason = if threat.should_block {
            match threat.threat_type {
                Some(t) => format!("threat detected: {t}"),
                None => "threat detected".to_string(),
            }
        } else if !within_risk {
            format!("risk score {risk:.2} exceeds threshold {:.2}", self.config.risk_threshold)
        } else {
            policy.reason
        };

        self.behavior.record(user_id, request, risk);

        Ok(AccessDecision {
            request_id: request.request_id.clone(),
            allowed,
            requires_mfa,
            session_ttl,
            risk_score: risk,
            factors,
            matched_policies: policy.matched_policies,
            matched_rules: policy.matched_rules,
            threat,
            obligations: policy.obligations,
            reason,
            timestamp: request.timestamp,
        })
    }

    fn blocked_decision(
        &self,
        request: &AccessRequest,
        threat: ThreatAssessment,
    ) -> AccessDecision {
        let reason = match threat.indicators.first() {
            Some(indicator) => format!("source address blocked ({indicator})"),
            None => "source address blocked".to_string(),
        };
        AccessDecision {
            request_id: request.request_id.clone(),
            allowed: false,
            requires_mfa: true,
            session_ttl: self.ttl.min_ttl(),
            risk_score: 1.0,
            factors: RiskFactors::worst(),
            matched_policies: Vec::new(),
            matched_rules: Vec::new(),
            threat,
            obligations: Vec::new(),
            reason,
            timestamp: request.timestamp,
        }
    }

    fn submit_audit(&self, request: &AccessRequest, decision: &AccessDecision) {
        if let Err(e) = self.audit.log_event(AuditEvent::from_decision(request, decision)) {
            self.counters.audit_failures.fetch_add(1, Ordering::Relaxed);
            warn!(request_id = %decision.request_id, error = %e, "Audit sink rejected event");
        }
    }

    /// Policy administration
    pub fn policies(&self) -> &PolicyEngine {
        &self.policies
    }

    /// Threat administration
    pub fn threats(&self) -> &Arc<ThreatDetector> {
        &self.threats
    }

    /// Device registry
    pub fn devices(&self) -> &DeviceTrustEvaluator {
        &self.devices
    }

    /// Behavior profiles
    pub fn behavior(&self) -> &BehaviorAnalyzer {
        &self.behavior
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start threat maintenance and, when sources are given, feed refresh.
    /// Must be called inside a tokio runtime.
    pub fn spawn_background_tasks(&self, feeds: Vec<Arc<dyn FeedSource>>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.threats.spawn_maintenance()];
        if !feeds.is_empty() {
            handles.push(self.threats.spawn_feed_refresh(feeds));
        }
        info!(tasks = handles.len(), "Background tasks started");
        handles
    }

    /// Get statistics
    pub fn stats(&self) -> DecisionStats {
        DecisionStats {
            evaluations: self.counters.evaluations.load(Ordering::Relaxed),
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            audit_failures: self.counters.audit_failures.load(Ordering::Relaxed),
            known_devices: self.devices.len(),
            behavior_profiles: self.behavior.len(),
        }
    }
}
