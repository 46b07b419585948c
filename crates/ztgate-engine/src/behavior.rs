//! Behavior Risk Analysis
//!
//! Per-user profiles of login hours, actions, locations and devices. Every
//! table is bounded: hours live in a ring with a running histogram, the
//! keyed tables evict their least used entry when full.
//!
//! Scoring reads the profile as it was before the request; the orchestrator
//! calls [`BehaviorAnalyzer::record`] once the decision is made.

use crate::config::BehaviorConfig;
use crate::EngineResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use ztgate_common::{clamp_risk, AccessRequest, CommonError, LocalClock};

/// Per-user behavior baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehaviorProfile {
    /// Owner
    pub user_id: String,
    /// Local login hours, oldest first
    pub login_hours: VecDeque<u8>,
    /// Count of each hour in `login_hours`
    pub hour_histogram: [u32; 24],
    /// `resource:action` frequencies
    pub actions: HashMap<String, u64>,
    /// Location frequencies
    pub locations: HashMap<String, u64>,
    /// Device frequencies
    pub devices: HashMap<String, u64>,
    /// Risk of the latest decision
    pub risk_score: f64,
    /// Enough hour samples to judge unusual hours
    pub baseline_established: bool,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last recorded request
    pub updated_at: DateTime<Utc>,
}

impl UserBehaviorProfile {
    fn new(user_id: &str, baseline_risk: f64, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            login_hours: VecDeque::new(),
            hour_histogram: [0; 24],
            actions: HashMap::new(),
            locations: HashMap::new(),
            devices: HashMap::new(),
            risk_score: baseline_risk,
            baseline_established: false,
            created_at: at,
            updated_at: at,
        }
    }

    /// Whether `hour` appears in the retained history
    pub fn has_hour(&self, hour: u32) -> bool {
        self.hour_histogram.get(hour as usize).is_some_and(|&n| n > 0)
    }

    fn push_hour(&mut self, hour: u32, capacity: usize) {
        let hour = (hour % 24) as u8;
        self.login_hours.push_back(hour);
        self.hour_histogram[hour as usize] += 1;
        while self.login_hours.len() > capacity {
            if let Some(old) = self.login_hours.pop_front() {
                let slot = &mut self.hour_histogram[old as usize];
                *slot = slot.saturating_sub(1);
            }
        }
    }
}

/// Increment `key`, evicting the least used entry when the table is full
fn bump(table: &mut HashMap<String, u64>, key: &str, capacity: usize) {
    if let Some(count) = table.get_mut(key) {
        *count += 1;
        return;
    }
    if table.len() >= capacity {
        let victim = table
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(k, _)| k.clone());
        if let Some(victim) = victim {
            table.remove(&victim);
        }
    }
    table.insert(key.to_string(), 1);
}

/// Behavior profiles and anomaly scoring
pub struct BehaviorAnalyzer {
    config: BehaviorConfig,
    clock: LocalClock,
    profiles: DashMap<String, UserBehaviorProfile>,
}

impl BehaviorAnalyzer {
    /// Create analyzer reading hours on `clock`
    pub fn new(config: BehaviorConfig, clock: LocalClock) -> Self {
        Self {
            config,
            clock,
            profiles: DashMap::new(),
        }
    }

    /// Anomaly risk of `request` against the user's profile
    pub fn evaluate_behavior_risk(
        &self,
        user_id: Option<&str>,
        request: &AccessRequest,
    ) -> EngineResult<f64> {
        let Some(user_id) = user_id else {
            return Ok(self.config.baseline_risk);
        };
        if user_id.trim().is_empty() {
            return Err(CommonError::InvalidField {
                field: "user_id",
                reason: "empty user id".to_string(),
            }
            .into());
        }

        let baseline = self.config.baseline_risk;
        let Some(profile) = self.profiles.get(user_id) else {
            self.profiles
                .entry(user_id.to_string())
                .or_insert_with(|| UserBehaviorProfile::new(user_id, baseline, request.timestamp));
            debug!(user_id, "Behavior profile created");
            return Ok(self.config.baseline_risk);
        };

        let mut risk = 0.0;
        let hour = self.clock.hour(request.timestamp);
        if profile.login_hours.len() >= self.config.min_hour_samples && !profile.has_hour(hour) {
            risk += self.config.unusual_hour_risk;
        }
        if profile.actions.len() >= self.config.min_known_actions
            && !profile.actions.contains_key(&request.action_key())
        {
            risk += self.config.new_action_risk;
        }

        let risk = clamp_risk(risk);
        debug!(user_id, hour, risk, "Behavior risk evaluated");
        Ok(risk)
    }

    /// Fold a decided request into the user's profile
    pub fn record(&self, user_id: Option<&str>, request: &AccessRequest, risk: f64) {
        let Some(user_id) = user_id else {
            return;
        };
        let config = &self.config;
        let mut profile = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| {
                UserBehaviorProfile::new(user_id, config.baseline_risk, request.timestamp)
            });

        profile.push_hour(self.clock.hour(request.timestamp), config.hour_capacity);
        bump(&mut profile.actions, &request.action_key(), config.action_capacity);
        if let Some(location) = request.location() {
            bump(&mut profile.locations, location, config.location_capacity);
        }
        bump(&mut profile.devices, &request.device_id, config.device_capacity);

        profile.risk_score = clamp_risk(risk);
        profile.baseline_established = profile.login_hours.len() >= config.min_hour_samples;
        if request.timestamp > profile.updated_at {
            profile.updated_at = request.timestamp;
        }
    }

    /// Snapshot of a profile
    pub fn profile(&self, user_id: &str) -> Option<UserBehaviorProfile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }

    /// Forget a user's history
    pub fn reset(&self, user_id: &str) -> bool {
        self.profiles.remove(user_id).is_some()
    }

    /// Number of profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
