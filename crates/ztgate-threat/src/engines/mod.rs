//! Detection engines
//!
//! Each engine inspects a request independently. The detector takes the
//! maximum score; an engine error counts as "no detection".

mod behavior;
mod intel;
mod ml;
mod signature;

pub use behavior::BehaviorEngine;
pub use intel::IntelEngine;
pub use ml::MlEngine;
pub use signature::{Signature, SignatureEngine, SignatureTarget};

use crate::{ThreatResult, ThreatType};
use chrono::{DateTime, Utc};
use ztgate_common::AccessRequest;

/// One engine's finding
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Engine that fired
    pub engine: &'static str,
    /// What it recognised
    pub threat_type: ThreatType,
    /// Confidence, [0,1]
    pub score: f64,
    /// Evidence, e.g. signature ids
    pub indicators: Vec<String>,
}

impl Detection {
    /// Create a detection with a clamped score
    pub fn new(engine: &'static str, threat_type: ThreatType, score: f64) -> Self {
        Self {
            engine,
            threat_type,
            score: ztgate_common::clamp_risk(score),
            indicators: Vec::new(),
        }
    }

    /// Attach evidence
    pub fn with_indicator(mut self, indicator: impl Into<String>) -> Self {
        self.indicators.push(indicator.into());
        self
    }
}

/// Pluggable threat detection engine
pub trait DetectionEngine: Send + Sync {
    /// Engine name used in logs and evidence
    fn name(&self) -> &'static str;

    /// Analyse one request
    fn detect(&self, request: &AccessRequest) -> ThreatResult<Option<Detection>>;

    /// Drop state that is no longer relevant at `now`
    fn maintain(&self, _now: DateTime<Utc>) -> usize {
        0
    }
}
