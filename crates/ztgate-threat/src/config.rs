//! Threat subsystem configuration

use crate::{ThreatError, ThreatResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ztgate_common::clock::MAX_SPAN_SECS;

/// Threat detection thresholds, mitigation and housekeeping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Score at or above which the source should be blocked
    pub block_threshold: f64,
    /// Score at or above which an alert is raised
    pub alert_threshold: f64,
    /// Score at or above which an incident is opened or extended
    pub incident_threshold: f64,
    /// Block sources automatically when `block_threshold` is reached
    pub auto_mitigation: bool,
    /// Lifetime of an automatic block
    pub block_duration_secs: u64,
    /// Period of the maintenance task
    pub maintenance_interval_secs: u64,
    /// How long resolved/closed incidents are kept
    pub incident_retention_secs: u64,
    /// Period of the intel feed refresh task
    pub feed_refresh_interval_secs: u64,
    /// Behavior engine settings
    pub behavior: BehaviorEngineConfig,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            block_threshold: 0.8,
            alert_threshold: 0.6,
            incident_threshold: 0.7,
            auto_mitigation: true,
            block_duration_secs: 3600,
            maintenance_interval_secs: 3600,
            incident_retention_secs: 7 * 24 * 3600,
            feed_refresh_interval_secs: 900,
            behavior: BehaviorEngineConfig::default(),
        }
    }
}

impl ThreatConfig {
    /// Reject out-of-range thresholds and zero periods
    pub fn validate(&self) -> ThreatResult<()> {
        for (name, value) in [
            ("block_threshold", self.block_threshold),
            ("alert_threshold", self.alert_threshold),
            ("incident_threshold", self.incident_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                let reason = format!("{name} = {value} is outside [0,1]");
                return Err(ThreatError::InvalidConfig(reason));
            }
        }
        for (name, value) in [
            ("block_duration_secs", self.block_duration_secs),
            ("maintenance_interval_secs", self.maintenance_interval_secs),
            ("incident_retention_secs", self.incident_retention_secs),
            ("feed_refresh_interval_secs", self.feed_refresh_interval_secs),
            ("behavior.window_secs", self.behavior.window_secs),
        ] {
            if value == 0 || value > MAX_SPAN_SECS {
                return Err(ThreatError::InvalidConfig(format!("{name} = {value} is out of range")));
            }
        }
        self.behavior.validate()
    }

    /// Automatic block lifetime
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    /// Maintenance period
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Incident retention
    pub fn incident_retention(&self) -> Duration {
        Duration::from_secs(self.incident_retention_secs)
    }

    /// Feed refresh period
    pub fn feed_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.feed_refresh_interval_secs)
    }
}

/// Per-IP sliding window limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorEngineConfig {
    /// Sliding window length
    pub window_secs: u64,
    /// Events retained per IP
    pub window_capacity: usize,
    /// Requests per window before the source looks like a burst
    pub burst_limit: usize,
    /// Distinct users per window before the source looks like stuffing
    pub max_users_per_ip: usize,
    /// Distinct resources per window before the source looks like enumeration
    pub max_resources_per_ip: usize,
}

impl Default for BehaviorEngineConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            window_capacity: 1024,
            burst_limit: 120,
            max_users_per_ip: 5,
            max_resources_per_ip: 50,
        }
    }
}

impl BehaviorEngineConfig {
    fn validate(&self) -> ThreatResult<()> {
        if self.burst_limit == 0 || self.max_users_per_ip == 0 || self.max_resources_per_ip == 0 {
            return Err(ThreatError::InvalidConfig("behavior limits must be positive".into()));
        }
        if self.window_capacity <= self.burst_limit {
            return Err(ThreatError::InvalidConfig(format!(
                "behavior.window_capacity ({}) must exceed burst_limit ({})",
                self.window_capacity, self.burst_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ThreatConfig::default();
        config.validate().unwrap();
        assert_eq!(config.block_duration(), Duration::from_secs(3600));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ThreatConfig = serde_json::from_str(r#"{ "block_threshold": 0.9 }"#).unwrap();
        assert_eq!(config.block_threshold, 0.9);
        assert_eq!(config.alert_threshold, 0.6);
        assert_eq!(config.behavior.burst_limit, 120);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ThreatConfig::default();
        config.alert_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = ThreatConfig::default();
        config.maintenance_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ThreatConfig::default();
        config.behavior.window_capacity = 10;
        assert!(config.validate().is_err());
    }
}
