//! Statistical anomaly engine
//!
//! A fixed logistic model over hand-built request features. There is no
//! training: weights are constants tuned so ordinary browser traffic lands
//! far below the firing threshold.

use super::{Detection, DetectionEngine};
use crate::{ThreatResult, ThreatType};
use ztgate_common::AccessRequest;

const ENGINE: &str = "ml";

const BIAS: f64 = -4.0;
const W_EMPTY_UA: f64 = 1.5;
const W_NON_BROWSER_UA: f64 = 0.8;
const W_SPECIAL_CHARS: f64 = 6.0;
const W_LENGTH: f64 = 1.5;
const W_ENTROPY: f64 = 1.0;

/// Probability at or above which the engine reports an anomaly
const FIRE_THRESHOLD: f64 = 0.5;

const SPECIAL: &[char] = &[
    '\'', '"', '<', '>', ';', '(', ')', '%', '$', '|', '&', '`', '\\', '{', '}',
];

/// Request features fed to the model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    empty_user_agent: f64,
    non_browser_user_agent: f64,
    special_char_ratio: f64,
    length: f64,
    entropy: f64,
}

impl Features {
    /// Extract features from a request
    pub fn extract(request: &AccessRequest) -> Self {
        let ua = request.user_agent.trim();
        let payload = format!("{}{}", request.resource, request.action);
        let len = payload.chars().count().max(1) as f64;
        let special = payload.chars().filter(|c| SPECIAL.contains(c)).count() as f64;

        Self {
            empty_user_agent: if ua.is_empty() { 1.0 } else { 0.0 },
            non_browser_user_agent: if ua.starts_with("Mozilla/") { 0.0 } else { 1.0 },
            special_char_ratio: special / len,
            length: (len / 256.0).min(1.0),
            entropy: shannon_entropy(&payload) / 8.0,
        }
    }
}

fn shannon_entropy(s: &str) -> f64 {
    let mut counts = [0usize; 256];
    for b in s.bytes() {
        counts[b as usize] += 1;
    }
    let len = s.len() as f64;
    if len == 0.0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Logistic anomaly model
#[derive(Debug, Default)]
pub struct MlEngine;

impl MlEngine {
    /// Create engine
    pub fn new() -> Self {
        Self
    }

    /// Anomaly probability for a request
    pub fn probability(&self, request: &AccessRequest) -> f64 {
        let f = Features::extract(request);
        let z = BIAS
            + W_EMPTY_UA * f.empty_user_agent
            + W_NON_BROWSER_UA * f.non_browser_user_agent
            + W_SPECIAL_CHARS * f.special_char_ratio
            + W_LENGTH * f.length
            + W_ENTROPY * f.entropy;
        1.0 / (1.0 + (-z).exp())
    }
}

impl DetectionEngine for MlEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn detect(&self, request: &AccessRequest) -> ThreatResult<Option<Detection>> {
        let p = self.probability(request);
        Ok((p >= FIRE_THRESHOLD).then(|| {
            Detection::new(ENGINE, ThreatType::Anomaly, p)
                .with_indicator(format!("{ENGINE}:p={p:.3}"))
        }))
    }
}
