//! Zero Trust Access Engine
//!
//! Turns one [`AccessRequest`] into a graded decision: allow or deny, whether
//! a second factor is required, and how long the session may live.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          ZeroTrustEngine                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐ │
//! │  │ DeviceTrust      │ │ BehaviorAnalyzer │ │ ThreatDetector       │ │
//! │  │ (fingerprints)   │ │ (bounded profile)│ │ (ztgate-threat)      │ │
//! │  └────────┬─────────┘ └────────┬─────────┘ └──────────┬───────────┘ │
//! │           └───── trust ────────┼──── behavior ── threat ┘           │
//! │                                ▼                                    │
//! │                    risk = 0.3·(1−t) + 0.4·b + 0.3·th                │
//! │                                │                                    │
//! │             ┌──────────────────┼───────────────────┐                │
//! │             ▼                  ▼                   ▼                │
//! │      PolicyEngine        TtlCalculator        AuditSink             │
//! │      (ztgate-policy)     (5 strategies)       (one event/decision)  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Evaluation is synchronous and touches only in-memory registries. Each
//! registry is a sharded map owned by its evaluator; there is no global lock.
//!
//! # Example
//!
//! ```no_run
//! use ztgate_common::AccessRequest;
//! use ztgate_engine::{EngineConfig, ZeroTrustEngine};
//! use ztgate_policy::{PolicyAction, PolicyRule, SecurityPolicy};
//!
//! let engine = ZeroTrustEngine::new(EngineConfig::default())?;
//! let baseline = SecurityPolicy::new("base", "Baseline", 0)
//!     .rule(PolicyRule::new("allow").then(PolicyAction::allow()));
//! engine.policies().add_policy(baseline)?;
//!
//! let ip = "10.0.0.7".parse()?;
//! let request = AccessRequest::new("laptop-1", ip, "Mozilla/5.0", "reports", "read")
//!     .with_user("alice");
//! let decision = engine.evaluate_access(&request)?;
//! println!(
//!     "allowed={} mfa={} ttl={:?}",
//!     decision.allowed, decision.requires_mfa, decision.session_ttl
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audit;
pub mod behavior;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod risk;
pub mod ttl;

pub use audit::{AuditEvent, AuditLogger, AuditSink};
pub use behavior::{BehaviorAnalyzer, UserBehaviorProfile};
pub use config::{BehaviorConfig, DeviceConfig, EngineConfig, TtlConfig};
pub use device::{fingerprint, DeviceTrustEvaluator, TrustedDevice};
pub use engine::{AccessDecision, DecisionStats, ZeroTrustEngine, MFA_RISK_THRESHOLD};
pub use error::{AuditError, EngineError, EngineResult};
pub use risk::{calculate_risk_score, RiskFactors};
pub use ttl::{TtlCalculator, TtlStrategy};
pub use ztgate_common::AccessRequest;
