//! Device Trust Evaluation
//!
//! Devices are keyed by a fingerprint over `ip | user_agent | device_id`.
//! Trust grows with device age and decays when a device goes quiet:
//!
//! ```text
//! trust = base + min(days_since_first / 30, 0.3)
//!              - (days_since_last > 30 ? min(days_since_last / 365, 0.5) : 0)
//!              - (compromised || !active ? 0.8 : 0)
//! ```

use crate::config::DeviceConfig;
use crate::EngineResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use ztgate_common::{clamp_trust, span_secs, AccessRequest, CommonError};

const SECS_PER_DAY: f64 = 86_400.0;
const MAX_AGE_BONUS: f64 = 0.3;
const STALE_AFTER_DAYS: f64 = 30.0;
const MAX_STALENESS: f64 = 0.5;
const COMPROMISE_PENALTY: f64 = 0.8;

/// Known device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    /// Client supplied identifier
    pub device_id: String,
    /// User seen on the device, if any
    pub user_id: Option<String>,
    /// First sighting
    pub first_seen: DateTime<Utc>,
    /// Latest sighting
    pub last_seen: DateTime<Utc>,
    /// Trust computed at the latest sighting
    pub trust_level: f64,
    /// Cleared by an operator to distrust the device
    pub active: bool,
    /// Set when the device is known to be compromised
    pub compromised: bool,
    /// Treated as unknown from this instant
    pub expires_at: DateTime<Utc>,
}

impl TrustedDevice {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Device fingerprint: SHA-256 hex over `ip|user_agent|device_id`
pub fn fingerprint(request: &AccessRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.ip.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(request.user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(request.device_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_seconds() as f64 / SECS_PER_DAY).max(0.0)
}

/// Device registry and trust scorer
pub struct DeviceTrustEvaluator {
    config: DeviceConfig,
    devices: DashMap<String, TrustedDevice>,
}

impl DeviceTrustEvaluator {
    /// Create empty registry
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            devices: DashMap::new(),
        }
    }

    /// Score the request's device and record the sighting
    pub fn evaluate_device_trust(&self, request: &AccessRequest) -> EngineResult<f64> {
        if request.device_id.trim().is_empty() {
            return Err(CommonError::MissingField("device_id").into());
        }

        let now = request.timestamp;
        let key = fingerprint(request);
        let mut fresh = false;
        let mut entry = self.devices.entry(key).or_insert_with(|| {
            fresh = true;
            self.enrol(request, now, false)
        });

        if entry.is_expired(now) {
            // Compromise outlives expiry
            let compromised = entry.compromised;
            debug!(device_id = %request.device_id, "Device registration expired, re-enrolling");
            *entry = self.enrol(request, now, compromised);
            fresh = true;
        }

        if fresh && !entry.compromised {
            debug!(device_id = %request.device_id, trust = entry.trust_level, "New device");
            return Ok(entry.trust_level);
        }

        let trust = self.score(&entry, now);
        entry.trust_level = trust;
        if now > entry.last_seen {
            entry.last_seen = now;
        }
        entry.expires_at = entry.last_seen + span_secs(u64::from(self.config.expiry_days) * 86_400);
        if entry.user_id.is_none() {
            entry.user_id = request.user_id.clone();
        }

        debug!(device_id = %request.device_id, trust, "Device trust evaluated");
        Ok(trust)
    }

    fn score(&self, device: &TrustedDevice, now: DateTime<Utc>) -> f64 {
        let age_bonus = (days_between(device.first_seen, now) / 30.0).min(MAX_AGE_BONUS);
        let idle_days = days_between(device.last_seen, now);
        let staleness = if idle_days > STALE_AFTER_DAYS {
            (idle_days / 365.0).min(MAX_STALENESS)
        } else {
            0.0
        };
        let compromise = if device.compromised || !device.active {
            COMPROMISE_PENALTY
        } else {
            0.0
        };
        clamp_trust(self.config.base_trust + age_bonus - staleness - compromise)
    }

    fn enrol(
        &self,
        request: &AccessRequest,
        now: DateTime<Utc>,
        compromised: bool,
    ) -> TrustedDevice {
        TrustedDevice {
            device_id: request.device_id.clone(),
            user_id: request.user_id.clone(),
            first_seen: now,
            last_seen: now,
            trust_level: clamp_trust(self.config.initial_trust),
            active: true,
            compromised,
            expires_at: now + span_secs(u64::from(self.config.expiry_days) * 86_400),
        }
    }

    /// Pre-enrol the request's device as first seen at `first_seen` and last
    /// seen at the request time. Returns the fingerprint.
    pub fn register(
        &self,
        request: &AccessRequest,
        first_seen: DateTime<Utc>,
    ) -> EngineResult<String> {
        if request.device_id.trim().is_empty() {
            return Err(CommonError::MissingField("device_id").into());
        }
        let key = fingerprint(request);
        let mut device = self.enrol(request, request.timestamp, false);
        device.first_seen = first_seen.min(request.timestamp);
        device.trust_level = self.score(&device, request.timestamp);

        info!(device_id = %request.device_id, fingerprint = %key, "Device registered");
        self.devices.insert(key.clone(), device);
        Ok(key)
    }

    /// Flag a device as compromised; returns whether it exists
    pub fn mark_compromised(&self, fingerprint: &str) -> bool {
        match self.devices.get_mut(fingerprint) {
            Some(mut device) => {
                device.compromised = true;
                info!(device_id = %device.device_id, "Device marked compromised");
                true
            }
            None => false,
        }
    }

    /// Deactivate a device; returns whether it exists
    pub fn deactivate(&self, fingerprint: &str) -> bool {
        match self.devices.get_mut(fingerprint) {
            Some(mut device) => {
                device.active = false;
                info!(device_id = %device.device_id, "Device deactivated");
                true
            }
            None => false,
        }
    }

    /// Device by fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<TrustedDevice> {
        self.devices.get(fingerprint).map(|d| d.clone())
    }

    /// Devices seen with `user_id`
    pub fn devices_for_user(&self, user_id: &str) -> Vec<TrustedDevice> {
        self.devices
            .iter()
            .filter(|d| d.user_id.as_deref() == Some(user_id))
            .map(|d| d.clone())
            .collect()
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> AccessRequest {
        AccessRequest::new("laptop-7", "10.1.2.3".parse().unwrap(), "Mozilla/5.0", "ledger", "read")
    }

    fn evaluator() -> DeviceTrustEvaluator {
        DeviceTrustEvaluator::new(DeviceConfig::default())
    }

    #[test]
    fn test_new_device_gets_initial_trust() {
        let devices = evaluator();
        assert_eq!(devices.evaluate_device_trust(&request()).unwrap(), 0.3);
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_stale_device_decays() {
        let devices = evaluator();
        let now = Utc::now();
        let then = now - Duration::days(40);
        devices.register(&request().at(then), then).unwrap();

        let trust = devices.evaluate_device_trust(&request().at(now)).unwrap();
        let expected = 0.3 + 0.3 - 40.0 / 365.0;
        assert!((trust - expected).abs() < 1e-9, "trust {trust}");
        assert!((trust - 0.4904).abs() < 1e-4);
    }

    #[test]
    fn test_repeat_sighting_updates_last_seen() {
        let devices = evaluator();
        let now = Utc::now();
        let req = request().at(now - Duration::days(10));
        devices.evaluate_device_trust(&req).unwrap();

        let trust = devices.evaluate_device_trust(&request().at(now)).unwrap();
        // Ten days old caps the age bonus, ten idle days are not stale yet
        assert!((trust - 0.6).abs() < 1e-9);

        let device = devices.get(&fingerprint(&req)).unwrap();
        assert_eq!(device.last_seen, now);
        assert_eq!(device.trust_level, trust);
    }

    #[test]
    fn test_compromised_device_loses_trust() {
        let devices = evaluator();
        let now = Utc::now();
        let key = devices.register(&request().at(now), now - Duration::days(90)).unwrap();
        assert!(devices.mark_compromised(&key));

        let trust = devices.evaluate_device_trust(&request().at(now)).unwrap();
        assert_eq!(trust, 0.0);
        assert!(!devices.mark_compromised("unknown"));
    }

    #[test]
    fn test_inactive_device_loses_trust() {
        let devices = evaluator();
        let now = Utc::now();
        let key = devices.register(&request().at(now), now - Duration::days(90)).unwrap();
        assert!(devices.deactivate(&key));
        let trust = devices.evaluate_device_trust(&request().at(now)).unwrap();
        assert!((trust - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_device_is_re_enrolled() {
        let devices = evaluator();
        let now = Utc::now();
        let old = now - Duration::days(400);
        devices.register(&request().at(old), old).unwrap();

        assert_eq!(devices.evaluate_device_trust(&request().at(now)).unwrap(), 0.3);
        let device = devices.get(&fingerprint(&request())).unwrap();
        assert_eq!(device.first_seen, now);
    }

    #[test]
    fn test_missing_device_id_is_an_error() {
        let devices = evaluator();
        let mut req = request();
        req.device_id = String::new();
        assert!(matches!(
            devices.evaluate_device_trust(&req),
            Err(crate::EngineError::Request(CommonError::MissingField("device_id")))
        ));
    }

    #[test]
    fn test_fingerprint_depends_on_all_parts() {
        let base = request();
        let mut other_ua = base.clone();
        other_ua.user_agent = "curl/8.0".into();
        let mut other_ip = base.clone();
        other_ip.ip = "10.1.2.4".parse().unwrap();

        assert_eq!(fingerprint(&base).len(), 64);
        assert_ne!(fingerprint(&base), fingerprint(&other_ua));
        assert_ne!(fingerprint(&base), fingerprint(&other_ip));
    }

    #[test]
    fn test_devices_for_user() {
        let devices = evaluator();
        devices.evaluate_device_trust(&request().with_user("alice")).unwrap();
        let mut phone = request().with_user("alice");
        phone.device_id = "phone-1".into();
        devices.evaluate_device_trust(&phone).unwrap();
        let kiosk = AccessRequest::new("kiosk", "10.9.9.9".parse().unwrap(), "x", "a", "b");
        devices.evaluate_device_trust(&kiosk).unwrap();

        assert_eq!(devices.devices_for_user("alice").len(), 2);
        assert!(devices.devices_for_user("bob").is_empty());
    }
}
