//! Alert delivery contract
//!
//! Alerts are fire-and-forget: a sink must not block detection and its
//! failures never change an assessment.

use crate::{Severity, ThreatType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Alert raised when an assessment crosses the alert threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Unique id
    pub id: String,
    /// Dominant threat type
    pub alert_type: ThreatType,
    /// Severity band
    pub severity: Severity,
    /// Threat score
    pub score: f64,
    /// Offending source
    pub source_ip: IpAddr,
    /// User on the request, if authenticated
    pub user_id: Option<String>,
    /// Request that triggered it
    pub request_id: String,
    /// Incident it belongs to
    pub incident_id: Option<String>,
    /// Evidence
    pub indicators: Vec<String>,
    /// Raised at
    pub created_at: DateTime<Utc>,
}

/// Alert delivery collaborator
pub trait AlertSink: Send + Sync {
    /// Deliver an alert; must not block
    fn send_alert(&self, alert: SecurityAlert);
}

/// Emits alerts as `warn!` events
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send_alert(&self, alert: SecurityAlert) {
        warn!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            score = alert.score,
            ip = %alert.source_ip,
            incident_id = ?alert.incident_id,
            "Security alert"
        );
    }
}

/// Forwards alerts over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<SecurityAlert>,
}

impl ChannelAlertSink {
    /// Create sink and its receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SecurityAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn send_alert(&self, alert: SecurityAlert) {
        if let Err(e) = self.tx.send(alert) {
            debug!(alert_id = %e.0.id, "Alert receiver dropped");
        }
    }
}

/// Discards alerts
#[derive(Debug, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn send_alert(&self, _alert: SecurityAlert) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> SecurityAlert {
        SecurityAlert {
            id: "a-1".into(),
            alert_type: ThreatType::Scanner,
            severity: Severity::High,
            score: 0.75,
            source_ip: "192.0.2.1".parse().unwrap(),
            user_id: None,
            request_id: "r-1".into(),
            incident_id: None,
            indicators: vec!["signature:scanner-user-agent".into()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAlertSink::new();
        sink.send_alert(alert());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, "a-1");
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelAlertSink::new();
        drop(rx);
        sink.send_alert(alert());
    }

    #[test]
    fn test_tracing_and_null_sinks() {
        TracingAlertSink.send_alert(alert());
        NullAlertSink.send_alert(alert());
    }
}
