//! Per-source behavior engine
//!
//! Keeps a bounded sliding window of recent requests per source IP and
//! flags bursts, identity spraying and resource enumeration.

use super::{Detection, DetectionEngine};
use crate::{BehaviorEngineConfig, ThreatResult, ThreatType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use ztgate_common::span_secs;
use ztgate_common::AccessRequest;

const ENGINE: &str = "behavior";

#[derive(Debug)]
struct Event {
    at: DateTime<Utc>,
    user: Option<String>,
    resource: String,
}

/// Sliding window engine keyed by source IP
pub struct BehaviorEngine {
    config: BehaviorEngineConfig,
    windows: DashMap<IpAddr, VecDeque<Event>>,
}

impl BehaviorEngine {
    /// Create engine
    pub fn new(config: BehaviorEngineConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Number of tracked sources
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }

    fn window(&self) -> chrono::Duration {
        span_secs(self.config.window_secs)
    }
}

/// Score for `observed` against `limit`: 0.6 just past the limit, 0.8 at
/// twice the limit, saturating at three times.
fn excess_score(observed: usize, limit: usize) -> Option<f64> {
    (observed > limit).then(|| (0.4 + 0.2 * observed as f64 / limit as f64).min(1.0))
}

impl DetectionEngine for BehaviorEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn detect(&self, request: &AccessRequest) -> ThreatResult<Option<Detection>> {
        let now = request.timestamp;
        let cutoff = now - self.window();

        let mut window = self.windows.entry(request.ip).or_default();
        while window.front().map_or(false, |e| e.at <= cutoff) {
            window.pop_front();
        }
        if window.len() >= self.config.window_capacity {
            window.pop_front();
        }
        window.push_back(Event {
            at: now,
            user: request.user_id.clone(),
            resource: request.resource.clone(),
        });

        let requests = window.len();
        let users: HashSet<&str> = window.iter().filter_map(|e| e.user.as_deref()).collect();
        let resources: HashSet<&str> = window.iter().map(|e| e.resource.as_str()).collect();

        let candidates = [
            (ThreatType::RequestBurst, "requests", requests, self.config.burst_limit),
            (ThreatType::CredentialStuffing, "users", users.len(), self.config.max_users_per_ip),
            (
                ThreatType::Enumeration,
                "resources",
                resources.len(),
                self.config.max_resources_per_ip,
            ),
        ];

        let mut best: Option<Detection> = None;
        for (threat_type, label, observed, limit) in candidates {
            if let Some(score) = excess_score(observed, limit) {
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(
                        Detection::new(ENGINE, threat_type, score)
                            .with_indicator(format!("{ENGINE}:{label}={observed}/{limit}")),
                    );
                }
            }
        }
        Ok(best)
    }

    fn maintain(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window();
        let before = self.windows.len();
        self.windows
            .retain(|_, events| events.back().map_or(false, |e| e.at > cutoff));
        before.saturating_sub(self.windows.len())
    }
}
