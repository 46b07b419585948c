//! Threat Detection Subsystem
//!
//! Aggregates independent detection engines into one assessment per
//! request, then opens incidents, blocks sources and raises alerts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          ThreatDetector                           │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  request ──► BlockList ── blocked ──► score 1.0, should_block     │
//! │                 │ not blocked                                     │
//! │                 ▼                                                 │
//! │  ┌───────────┐ ┌──────────┐ ┌──────┐ ┌───────┐                    │
//! │  │ signature │ │ behavior │ │  ml  │ │ intel │◄── ThreatFeedCache │
//! │  └─────┬─────┘ └────┬─────┘ └──┬───┘ └───┬───┘        ▲           │
//! │        └────────────┴── max ───┴─────────┘            │           │
//! │                         │                     spawn_feed_refresh  │
//! │                         ▼                                         │
//! │       IncidentManager · BlockList (auto-mitigation) · AlertSink   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Detection is synchronous. Feed refresh and maintenance run as tokio
//! interval tasks and only ever remove expired entries.

#![warn(missing_docs)]

pub mod alerts;
pub mod blocklist;
pub mod config;
pub mod detector;
pub mod engines;
pub mod error;
pub mod feeds;
pub mod incidents;

pub use alerts::{AlertSink, ChannelAlertSink, NullAlertSink, SecurityAlert, TracingAlertSink};
pub use blocklist::{BlockList, BlockedIp};
pub use config::{BehaviorEngineConfig, ThreatConfig};
pub use detector::{DetectorStats, MaintenanceReport, ThreatDetector};
pub use engines::{Detection, DetectionEngine};
pub use error::{ThreatError, ThreatResult};
pub use feeds::{FeedSource, HttpFeedSource, StaticFeedSource, ThreatFeedCache};
pub use incidents::{
    IncidentManager, IncidentStatus, MitigationAction, MitigationType, ThreatIncident,
    TimelineEvent,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of threat an engine recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// SQL injection payload
    SqlInjection,
    /// Cross-site scripting payload
    CrossSiteScripting,
    /// Directory traversal payload
    PathTraversal,
    /// Shell command injection payload
    CommandInjection,
    /// Known scanning tool
    Scanner,
    /// Request burst from one source
    RequestBurst,
    /// Many identities tried from one source
    CredentialStuffing,
    /// Many resources probed from one source
    Enumeration,
    /// Statistical outlier
    Anomaly,
    /// Listed in threat intelligence
    KnownMalicious,
    /// Source already blocked
    BlockedSource,
}

impl ThreatType {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::SqlInjection => "sql_injection",
            ThreatType::CrossSiteScripting => "cross_site_scripting",
            ThreatType::PathTraversal => "path_traversal",
            ThreatType::CommandInjection => "command_injection",
            ThreatType::Scanner => "scanner",
            ThreatType::RequestBurst => "request_burst",
            ThreatType::CredentialStuffing => "credential_stuffing",
            ThreatType::Enumeration => "enumeration",
            ThreatType::Anomaly => "anomaly",
            ThreatType::KnownMalicious => "known_malicious",
            ThreatType::BlockedSource => "blocked_source",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat severity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// score < 0.4
    Low = 1,
    /// 0.4 ≤ score < 0.6
    Medium = 2,
    /// 0.6 ≤ score < 0.8
    High = 3,
    /// score ≥ 0.8
    Critical = 4,
}

impl Severity {
    /// Band for a threat score
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => Severity::Critical,
            s if s >= 0.6 => Severity::High,
            s if s >= 0.4 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Kind of indicator carried by a threat feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    /// IP address
    Ip,
    /// Domain name
    Domain,
    /// Payload pattern
    Pattern,
    /// Behavioral marker
    Behavior,
    /// File or content hash
    Hash,
    /// User agent string
    UserAgent,
}

/// Threat intelligence indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIndicator {
    /// Indicator kind
    pub indicator_type: IndicatorType,
    /// Indicator value
    pub value: String,
    /// Confidence, [0,1]
    pub confidence: f64,
    /// Feed that supplied it
    pub source: String,
    /// First seen by the feed
    pub first_seen: DateTime<Utc>,
    /// Last seen by the feed
    pub last_seen: DateTime<Utc>,
    /// Ignored after this instant
    pub expires_at: Option<DateTime<Utc>>,
}

impl ThreatIndicator {
    /// Indicator first and last seen now, without expiry
    pub fn new(
        indicator_type: IndicatorType,
        value: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            indicator_type,
            value: value.into(),
            confidence: ztgate_common::clamp_risk(confidence),
            source: source.into(),
            first_seen: now,
            last_seen: now,
            expires_at: None,
        }
    }

    /// Set an expiry
    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Whether the indicator is still valid at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Merged verdict of all detection engines for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    /// At least one engine fired
    pub detected: bool,
    /// Highest engine score, [0,1]
    pub score: f64,
    /// Type reported by the dominant detection
    pub threat_type: Option<ThreatType>,
    /// Band of `score`
    pub severity: Severity,
    /// Evidence from every firing engine
    pub indicators: Vec<String>,
    /// Source should be blocked
    pub should_block: bool,
    /// Operators should be alerted
    pub should_alert: bool,
    /// Incident opened or extended by this request
    pub incident_id: Option<String>,
}

impl ThreatAssessment {
    /// Nothing detected
    pub fn clean() -> Self {
        Self {
            detected: false,
            score: 0.0,
            threat_type: None,
            severity: Severity::Low,
            indicators: Vec::new(),
            should_block: false,
            should_alert: false,
            incident_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!(Severity::from_score(0.39), Severity::Low);
        assert_eq!(Severity::from_score(0.4), Severity::Medium);
        assert_eq!(Severity::from_score(0.6), Severity::High);
        assert_eq!(Severity::from_score(0.8), Severity::Critical);
        assert_eq!(Severity::from_score(1.0), Severity::Critical);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_indicator_expiry() {
        let now = Utc::now();
        let live = ThreatIndicator::new(IndicatorType::Ip, "203.0.113.9", 0.9, "test");
        let expired = live.clone().expiring(now - chrono::Duration::minutes(1));
        assert!(live.is_live(now));
        assert!(!expired.is_live(now));
    }

    #[test]
    fn test_threat_type_names() {
        assert_eq!(ThreatType::SqlInjection.to_string(), "sql_injection");
        let json = serde_json::to_string(&ThreatType::KnownMalicious).unwrap();
        assert_eq!(json, "\"known_malicious\"");
    }
}
