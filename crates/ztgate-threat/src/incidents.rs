//! Incident Management
//!
//! Incidents are opened when a detection crosses the incident threshold.
//! Further detections of the same type from the same source extend the
//! open incident instead of creating a new one.

use crate::{Severity, ThreatError, ThreatResult, ThreatType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::info;
use ztgate_common::span_secs;

/// Timeline entries kept per incident; later events fold into the last one
pub const TIMELINE_LIMIT: usize = 64;
/// Distinct indicators kept per incident
pub const INDICATOR_LIMIT: usize = 128;

/// Incident lifecycle, forward only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Newly opened
    Open,
    /// Analyst working on it
    InProgress,
    /// Root cause addressed
    Resolved,
    /// Archived
    Closed,
}

impl IncidentStatus {
    /// Still attracting new detections
    pub fn is_active(self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::InProgress)
    }

    /// Permitted status changes
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Open, InProgress | Resolved) | (InProgress, Resolved) | (Resolved, Closed)
        )
    }
}

/// Entry in an incident's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What happened, latest wins once folded
    pub description: String,
    /// Events folded into this entry
    pub occurrences: u64,
}

/// Kind of mitigation applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationType {
    /// Source address blocked
    BlockIp,
    /// Operators alerted
    Alert,
}

/// Mitigation recorded against an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationAction {
    /// What was done
    pub action_type: MitigationType,
    /// What it was applied to
    pub target: String,
    /// When it was applied
    pub applied_at: DateTime<Utc>,
    /// When it lapses
    pub expires_at: Option<DateTime<Utc>>,
}

/// Security incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIncident {
    /// Unique id
    pub id: String,
    /// Threat type
    pub threat_type: ThreatType,
    /// Highest severity seen
    pub severity: Severity,
    /// Offending source
    pub source_ip: IpAddr,
    /// Highest score seen
    pub score: f64,
    /// Lifecycle status
    pub status: IncidentStatus,
    /// Detections folded into this incident
    pub detection_count: u64,
    /// Distinct indicators that triggered it
    pub indicators: Vec<String>,
    /// Opened at
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// History
    pub timeline: Vec<TimelineEvent>,
    /// Mitigations applied
    pub mitigations: Vec<MitigationAction>,
}

impl ThreatIncident {
    fn note(&mut self, at: DateTime<Utc>, description: impl Into<String>) {
        self.updated_at = at;
        if self.timeline.len() < TIMELINE_LIMIT {
            self.timeline.push(TimelineEvent {
                timestamp: at,
                description: description.into(),
                occurrences: 1,
            });
        } else if let Some(last) = self.timeline.last_mut() {
            last.timestamp = at;
            last.description = description.into();
            last.occurrences += 1;
        }
    }

    fn merge_indicators(&mut self, indicators: &[String]) {
        for indicator in indicators {
            if self.indicators.len() >= INDICATOR_LIMIT {
                break;
            }
            if !self.indicators.contains(indicator) {
                self.indicators.push(indicator.clone());
            }
        }
    }
}

/// Owner of every incident
#[derive(Debug, Default)]
pub struct IncidentManager {
    incidents: DashMap<String, ThreatIncident>,
    /// Active incident per (source, type)
    active: DashMap<(IpAddr, ThreatType), String>,
}

impl IncidentManager {
    /// Create empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an incident or extend the active one for the same source and type
    pub fn record(
        &self,
        ip: IpAddr,
        threat_type: ThreatType,
        score: f64,
        indicators: &[String],
        at: DateTime<Utc>,
    ) -> String {
        let score = ztgate_common::clamp_risk(score);
        let severity = Severity::from_score(score);
        let mut slot = self.active.entry((ip, threat_type)).or_default();

        if let Some(mut incident) = self.incidents.get_mut(slot.value()) {
            if incident.status.is_active() {
                incident.detection_count += 1;
                incident.score = incident.score.max(score);
                incident.severity = incident.severity.max(severity);
                incident.merge_indicators(indicators);
                incident.note(at, format!("repeat {threat_type} detection, score {score:.2}"));
                return incident.id.clone();
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut incident = ThreatIncident {
            id: id.clone(),
            threat_type,
            severity,
            source_ip: ip,
            score,
            status: IncidentStatus::Open,
            detection_count: 1,
            indicators: Vec::new(),
            created_at: at,
            updated_at: at,
            timeline: Vec::new(),
            mitigations: Vec::new(),
        };
        incident.merge_indicators(indicators);
        incident.note(at, format!("{threat_type} detected from {ip}, score {score:.2}"));
        info!(incident_id = %id, ip = %ip, threat_type = %threat_type, score, "Incident opened");

        self.incidents.insert(id.clone(), incident);
        *slot = id.clone();
        id
    }

    /// Record a mitigation against an incident
    pub fn add_mitigation(&self, incident_id: &str, action: MitigationAction) -> ThreatResult<()> {
        let mut incident = self
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| ThreatError::IncidentNotFound(incident_id.to_string()))?;
        let description = format!("mitigation {:?} on {}", action.action_type, action.target);
        incident.note(action.applied_at, description);
        incident.mitigations.push(action);
        Ok(())
    }

    /// Move an incident to a new status
    pub fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        at: DateTime<Utc>,
    ) -> ThreatResult<ThreatIncident> {
        let mut incident = self
            .incidents
            .get_mut(incident_id)
            .ok_or_else(|| ThreatError::IncidentNotFound(incident_id.to_string()))?;

        if !incident.status.can_transition_to(status) {
            return Err(ThreatError::InvalidTransition {
                incident_id: incident_id.to_string(),
                from: incident.status,
                to: status,
            });
        }

        let from = incident.status;
        incident.status = status;
        incident.note(at, format!("status {from:?} -> {status:?}"));
        info!(incident_id = %incident_id, ?from, to = ?status, "Incident status changed");

        let key = (incident.source_ip, incident.threat_type);
        let snapshot = incident.clone();
        drop(incident);

        if status.is_active() {
            self.active.insert(key, snapshot.id.clone());
        } else {
            self.active.remove_if(&key, |_, id| id == incident_id);
        }
        Ok(snapshot)
    }

    /// Incident by id
    pub fn get(&self, incident_id: &str) -> Option<ThreatIncident> {
        self.incidents.get(incident_id).map(|i| i.clone())
    }

    /// All incidents, newest first
    pub fn list(&self) -> Vec<ThreatIncident> {
        let mut all: Vec<_> = self.incidents.iter().map(|i| i.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Number of active incidents
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Highest score among active incidents, 0.0 when calm.
    ///
    /// Walks the active index only, so closed history does not add cost.
    pub fn system_threat_level(&self) -> f64 {
        self.active
            .iter()
            .filter_map(|slot| self.incidents.get(slot.value()).map(|i| i.score))
            .fold(0.0, f64::max)
    }

    /// Remove resolved/closed incidents untouched for longer than `retention`
    pub fn cleanup_stale(&self, now: DateTime<Utc>, retention: std::time::Duration) -> usize {
        let cutoff = now - span_secs(retention.as_secs());
        let before = self.incidents.len();
        self.incidents
            .retain(|_, i| i.status.is_active() || i.updated_at > cutoff);
        self.active.retain(|_, id| self.incidents.contains_key(id.as_str()));
        before.saturating_sub(self.incidents.len())
    }

    /// Number of stored incidents
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }
}
