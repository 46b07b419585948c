//! Engine Configuration
//!
//! Built once at construction and never mutated while evaluating. The risk
//! weights are deliberately absent: they are fixed constants in
//! [`crate::risk`].

use crate::ttl::TtlStrategy;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use ztgate_common::LocalClock;
use ztgate_threat::ThreatConfig;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest composite risk that may still be allowed
    pub risk_threshold: f64,
    /// Require MFA on every decision
    pub force_mfa: bool,
    /// Device trust settings
    pub device: DeviceConfig,
    /// Behavior profile settings
    pub behavior: BehaviorConfig,
    /// Session lifetime settings
    pub ttl: TtlConfig,
    /// Threat subsystem settings
    pub threat: ThreatConfig,
    /// Events kept by the in-memory audit logger
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            force_mfa: false,
            device: DeviceConfig::default(),
            behavior: BehaviorConfig::default(),
            ttl: TtlConfig::default(),
            threat: ThreatConfig::default(),
            audit_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file and validate
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Reject values the evaluators cannot work with
    pub fn validate(&self) -> EngineResult<()> {
        unit("risk_threshold", self.risk_threshold)?;
        self.device.validate()?;
        self.behavior.validate()?;
        self.ttl.validate()?;
        self.threat.validate()?;
        if self.audit_capacity == 0 {
            return Err(EngineError::InvalidConfig("audit_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn unit(name: &str, value: f64) -> EngineResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!("{name} = {value} is outside [0,1]")))
    }
}

/// Device trust settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Trust granted on first sighting
    pub initial_trust: f64,
    /// Base of the recomputed trust
    pub base_trust: f64,
    /// Days without a sighting after which a device is treated as unknown
    pub expiry_days: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            initial_trust: 0.3,
            base_trust: 0.3,
            expiry_days: 180,
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> EngineResult<()> {
        unit("device.initial_trust", self.initial_trust)?;
        unit("device.base_trust", self.base_trust)?;
        if self.expiry_days == 0 {
            return Err(EngineError::InvalidConfig("device.expiry_days must be positive".into()));
        }
        Ok(())
    }
}

/// Behavior profile settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Risk of a user without history
    pub baseline_risk: f64,
    /// Login hours remembered per user
    pub hour_capacity: usize,
    /// Distinct `resource:action` keys remembered per user
    pub action_capacity: usize,
    /// Distinct locations remembered per user
    pub location_capacity: usize,
    /// Distinct devices remembered per user
    pub device_capacity: usize,
    /// Hour samples needed before unusual hours count
    pub min_hour_samples: usize,
    /// Known actions needed before new actions count
    pub min_known_actions: usize,
    /// Added for a login at an hour never seen before
    pub unusual_hour_risk: f64,
    /// Added for a never seen `resource:action`
    pub new_action_risk: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            baseline_risk: 0.5,
            hour_capacity: 500,
            action_capacity: 256,
            location_capacity: 32,
            device_capacity: 32,
            min_hour_samples: 10,
            min_known_actions: 20,
            unusual_hour_risk: 0.2,
            new_action_risk: 0.3,
        }
    }
}

impl BehaviorConfig {
    fn validate(&self) -> EngineResult<()> {
        unit("behavior.baseline_risk", self.baseline_risk)?;
        unit("behavior.unusual_hour_risk", self.unusual_hour_risk)?;
        unit("behavior.new_action_risk", self.new_action_risk)?;
        if self.hour_capacity < self.min_hour_samples || self.hour_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "behavior.hour_capacity must be positive and hold min_hour_samples".into(),
            ));
        }
        if self.action_capacity < self.min_known_actions || self.action_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "behavior.action_capacity must be positive and hold min_known_actions".into(),
            ));
        }
        if self.location_capacity == 0 || self.device_capacity == 0 {
            return Err(EngineError::InvalidConfig("behavior capacities must be positive".into()));
        }
        Ok(())
    }
}

/// Session lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Longest session
    pub base_ttl_secs: u64,
    /// Shortest session
    pub min_ttl_secs: u64,
    /// Floor of the off-hours reduction, before the global clamp
    pub off_hours_floor_secs: u64,
    /// Strategy used by the orchestrator
    pub strategy: TtlStrategy,
    /// First business hour, local time
    pub business_start_hour: u32,
    /// First hour after business, local time
    pub business_end_hour: u32,
    /// Local time offset east of UTC
    pub utc_offset_minutes: i32,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            base_ttl_secs: 30 * 60,
            min_ttl_secs: 5 * 60,
            off_hours_floor_secs: 3 * 60,
            strategy: TtlStrategy::Adaptive,
            business_start_hour: 9,
            business_end_hour: 18,
            utc_offset_minutes: 0,
        }
    }
}

impl TtlConfig {
    /// Longest session
    pub fn base_ttl(&self) -> Duration {
        Duration::from_secs(self.base_ttl_secs)
    }

    /// Shortest session
    pub fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.min_ttl_secs)
    }

    /// Off-hours floor
    pub fn off_hours_floor(&self) -> Duration {
        Duration::from_secs(self.off_hours_floor_secs)
    }

    /// Deployment-local clock
    pub fn clock(&self) -> EngineResult<LocalClock> {
        LocalClock::new(self.utc_offset_minutes, self.business_start_hour, self.business_end_hour)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    fn validate(&self) -> EngineResult<()> {
        if self.min_ttl_secs == 0 || self.min_ttl_secs > self.base_ttl_secs {
            return Err(EngineError::InvalidConfig(format!(
                "ttl bounds [{}s, {}s] are not a valid range",
                self.min_ttl_secs, self.base_ttl_secs
            )));
        }
        if self.off_hours_floor_secs == 0 {
            let reason = "ttl.off_hours_floor_secs must be positive";
            return Err(EngineError::InvalidConfig(reason.into()));
        }
        self.clock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.risk_threshold, 0.7);
        assert_eq!(config.ttl.base_ttl(), Duration::from_secs(1800));
        assert_eq!(config.ttl.min_ttl(), Duration::from_secs(300));
        assert_eq!(config.ttl.strategy, TtlStrategy::Adaptive);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("ztgate-config-{}.json", std::process::id()));
        let mut config = EngineConfig::default();
        config.force_mfa = true;
        config.ttl.strategy = TtlStrategy::Stepped;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(loaded.force_mfa);
        assert_eq!(loaded.ttl.strategy, TtlStrategy::Stepped);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "risk_threshold": 0.6, "ttl": { "strategy": "linear" } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk_threshold, 0.6);
        assert_eq!(config.ttl.strategy, TtlStrategy::Linear);
        assert_eq!(config.ttl.base_ttl_secs, 1800);
        assert_eq!(config.threat.block_threshold, 0.8);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.ttl.min_ttl_secs = 3600;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.risk_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ttl.business_start_hour = 20;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.threat.block_threshold = 2.0;
        assert!(matches!(config.validate(), Err(EngineError::Threat(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(EngineConfig::load("/nonexistent/ztgate.json"), Err(EngineError::Io(_))));
    }
}
