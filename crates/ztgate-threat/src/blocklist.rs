//! Blocked source addresses

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;
use ztgate_common::span_secs;

/// A blocked source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedIp {
    /// Blocked address
    pub ip: IpAddr,
    /// Why it was blocked
    pub reason: String,
    /// When the block started
    pub blocked_at: DateTime<Utc>,
    /// Block ends here; `None` is permanent
    pub expires_at: Option<DateTime<Utc>>,
    /// Threat score that triggered the block
    pub threat_score: f64,
}

impl BlockedIp {
    /// Whether the block is in force at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Block list read by every evaluation before any other check
#[derive(Debug, Default)]
pub struct BlockList {
    entries: DashMap<IpAddr, BlockedIp>,
}

impl BlockList {
    /// Create empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `ip` for `duration`, or permanently when `None`
    pub fn block(
        &self,
        ip: IpAddr,
        reason: impl Into<String>,
        duration: Option<Duration>,
        threat_score: f64,
        now: DateTime<Utc>,
    ) -> BlockedIp {
        let entry = BlockedIp {
            ip,
            reason: reason.into(),
            blocked_at: now,
            expires_at: duration.map(|d| now + span_secs(d.as_secs())),
            threat_score: ztgate_common::clamp_risk(threat_score),
        };
        info!(ip = %ip, reason = %entry.reason, expires_at = ?entry.expires_at, "IP blocked");
        self.entries.insert(ip, entry.clone());
        entry
    }

    /// Lift a block; returns whether one existed
    pub fn unblock(&self, ip: IpAddr) -> bool {
        let removed = self.entries.remove(&ip).is_some();
        if removed {
            info!(ip = %ip, "IP unblocked");
        }
        removed
    }

    /// Active block for `ip`; expired entries count as absent
    pub fn get(&self, ip: IpAddr, now: DateTime<Utc>) -> Option<BlockedIp> {
        self.entries
            .get(&ip)
            .filter(|b| b.is_active(now))
            .map(|b| b.clone())
    }

    /// Whether `ip` is blocked at `now`
    pub fn is_blocked(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        self.get(ip, now).is_some()
    }

    /// All active blocks
    pub fn active(&self, now: DateTime<Utc>) -> Vec<BlockedIp> {
        self.entries
            .iter()
            .filter(|b| b.is_active(now))
            .map(|b| b.clone())
            .collect()
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, b| b.is_active(now));
        before.saturating_sub(self.entries.len())
    }

    /// Stored entries, including expired ones awaiting cleanup
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
