//! Composite risk score
//!
//! ```text
//! risk = (1 - device_trust) * 0.3 + behavior_risk * 0.4 + threat_level * 0.3
//! ```

use serde::{Deserialize, Serialize};
use ztgate_common::{clamp_risk, clamp_trust};

/// Weight of device distrust
pub const DEVICE_WEIGHT: f64 = 0.3;
/// Weight of behavior anomaly
pub const BEHAVIOR_WEIGHT: f64 = 0.4;
/// Weight of the threat level
pub const THREAT_WEIGHT: f64 = 0.3;

/// Inputs to the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    /// Device trust, [0,1]
    pub device_trust: f64,
    /// Behavior anomaly risk, [0,1]
    pub behavior_risk: f64,
    /// Threat score, [0,1]
    pub threat_level: f64,
}

impl RiskFactors {
    /// Worst case on every axis
    pub fn worst() -> Self {
        Self {
            device_trust: 0.0,
            behavior_risk: 1.0,
            threat_level: 1.0,
        }
    }
}

/// Weighted composite risk in [0,1]; non-finite inputs count as worst case
pub fn calculate_risk_score(factors: RiskFactors) -> f64 {
    let distrust = 1.0 - clamp_trust(factors.device_trust);
    clamp_risk(
        distrust * DEVICE_WEIGHT
            + clamp_risk(factors.behavior_risk) * BEHAVIOR_WEIGHT
            + clamp_risk(factors.threat_level) * THREAT_WEIGHT,
    )
}
