//! Threat intelligence engine
//!
//! Looks request attributes up in the local feed cache. Never performs
//! network I/O; the cache is filled by the feed refresh task.

use super::{Detection, DetectionEngine};
use crate::{IndicatorType, ThreatFeedCache, ThreatIndicator, ThreatResult, ThreatType};
use std::sync::Arc;
use ztgate_common::AccessRequest;

const ENGINE: &str = "intel";

/// Feed-cache lookup engine
pub struct IntelEngine {
    cache: Arc<ThreatFeedCache>,
}

impl IntelEngine {
    /// Create engine over a shared cache
    pub fn new(cache: Arc<ThreatFeedCache>) -> Self {
        Self { cache }
    }
}

impl DetectionEngine for IntelEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn detect(&self, request: &AccessRequest) -> ThreatResult<Option<Detection>> {
        let now = request.timestamp;
        let ip = request.ip.to_string();

        let mut hits: Vec<ThreatIndicator> = Vec::new();
        hits.extend(self.cache.lookup(IndicatorType::Ip, &ip, now));
        hits.extend(self.cache.lookup(IndicatorType::UserAgent, &request.user_agent, now));
        if let Some(domain) = request.domain() {
            hits.extend(self.cache.lookup(IndicatorType::Domain, domain, now));
        }

        let Some(score) = hits.iter().map(|i| i.confidence).reduce(f64::max) else {
            return Ok(None);
        };

        let mut detection = Detection::new(ENGINE, ThreatType::KnownMalicious, score);
        detection.indicators = hits
            .iter()
            .map(|i| format!("{ENGINE}:{}:{:?}:{}", i.source, i.indicator_type, i.value))
            .collect();
        Ok(Some(detection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ztgate_common::request::CONTEXT_DOMAIN;

    fn request(ip: &str) -> AccessRequest {
        AccessRequest::new("dev", ip.parse().unwrap(), "Mozilla/5.0", "orders", "read")
    }

    #[test]
    fn test_listed_ip_detected() {
        let cache = Arc::new(ThreatFeedCache::new());
        cache.insert(ThreatIndicator::new(IndicatorType::Ip, "203.0.113.50", 0.95, "abuse-list"));
        let engine = IntelEngine::new(cache);

        let d = engine.detect(&request("203.0.113.50")).unwrap().unwrap();
        assert_eq!(d.threat_type, ThreatType::KnownMalicious);
        assert_eq!(d.score, 0.95);
        assert!(engine.detect(&request("203.0.113.51")).unwrap().is_none());
    }

    #[test]
    fn test_highest_confidence_wins() {
        let cache = Arc::new(ThreatFeedCache::new());
        cache.insert(ThreatIndicator::new(IndicatorType::Ip, "203.0.113.50", 0.5, "a"));
        cache.insert(ThreatIndicator::new(IndicatorType::Domain, "evil.example", 0.7, "b"));
        let engine = IntelEngine::new(cache);

        let req = request("203.0.113.50").with_context(CONTEXT_DOMAIN, "Evil.Example");
        let d = engine.detect(&req).unwrap().unwrap();
        assert_eq!(d.score, 0.7);
        assert_eq!(d.indicators.len(), 2);
    }

    #[test]
    fn test_expired_indicator_ignored() {
        let cache = Arc::new(ThreatFeedCache::new());
        cache.insert(
            ThreatIndicator::new(IndicatorType::Ip, "203.0.113.50", 0.9, "a")
                .expiring(Utc::now() - chrono::Duration::hours(1)),
        );
        let engine = IntelEngine::new(cache);
        assert!(engine.detect(&request("203.0.113.50")).unwrap().is_none());
    }
}
