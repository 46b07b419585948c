//! Threat Feeds
//!
//! Local indicator cache plus the sources that refill it. Detection only
//! ever reads the cache; fetching happens on a background interval.

use crate::{IndicatorType, ThreatError, ThreatIndicator, ThreatResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Indicator cache keyed by type and normalised value
#[derive(Debug, Default)]
pub struct ThreatFeedCache {
    indicators: DashMap<(IndicatorType, String), ThreatIndicator>,
}

fn normalise(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

impl ThreatFeedCache {
    /// Create empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an indicator
    pub fn insert(&self, indicator: ThreatIndicator) {
        let key = (indicator.indicator_type, normalise(&indicator.value));
        self.indicators.insert(key, indicator);
    }

    /// Live indicator for a value, if any
    pub fn lookup(
        &self,
        indicator_type: IndicatorType,
        value: &str,
        now: DateTime<Utc>,
    ) -> Option<ThreatIndicator> {
        self.indicators
            .get(&(indicator_type, normalise(value)))
            .filter(|i| i.is_live(now))
            .map(|i| i.clone())
    }

    /// Replace everything a source previously supplied
    pub fn replace_source(&self, source: &str, indicators: Vec<ThreatIndicator>) -> usize {
        self.indicators.retain(|_, i| i.source != source);
        let count = indicators.len();
        for indicator in indicators {
            self.insert(indicator);
        }
        count
    }

    /// Drop expired indicators
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.indicators.len();
        self.indicators.retain(|_, i| i.is_live(now));
        before.saturating_sub(self.indicators.len())
    }

    /// Number of cached indicators
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

/// Source of threat indicators
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Source name, stamped on every indicator it supplies
    fn name(&self) -> &str;

    /// Fetch the complete current indicator set
    async fn fetch(&self) -> ThreatResult<Vec<ThreatIndicator>>;
}

/// Fixed in-memory indicator set
pub struct StaticFeedSource {
    name: String,
    indicators: Vec<ThreatIndicator>,
}

impl StaticFeedSource {
    /// Create source
    pub fn new(name: impl Into<String>, indicators: Vec<ThreatIndicator>) -> Self {
        Self {
            name: name.into(),
            indicators,
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ThreatResult<Vec<ThreatIndicator>> {
        Ok(self
            .indicators
            .iter()
            .cloned()
            .map(|mut i| {
                i.source = self.name.clone();
                i
            })
            .collect())
    }
}

/// Wire record of an HTTP JSON feed
#[derive(Debug, Deserialize)]
struct FeedRecord {
    #[serde(rename = "type")]
    indicator_type: IndicatorType,
    value: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

fn default_confidence() -> f64 {
    0.8
}

/// HTTP source serving a JSON array of `{type, value, confidence, expires_at}`
pub struct HttpFeedSource {
    name: String,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Create source
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> ThreatResult<Self> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ThreatError::feed(&name, e))?;
        Ok(Self {
            name,
            url: url.into(),
            api_key: None,
            client,
        })
    }

    /// Send a bearer token with every fetch
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ThreatResult<Vec<ThreatIndicator>> {
        let mut request = self.client.get(&self.url).header("Accept", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| ThreatError::feed(&self.name, e))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ThreatError::feed(&self.name, format!("HTTP {status}")));
        }

        let records: Vec<FeedRecord> =
            response.json().await.map_err(|e| ThreatError::feed(&self.name, e))?;
        Ok(records
            .into_iter()
            .map(|r| {
                let source = self.name.clone();
                let mut indicator =
                    ThreatIndicator::new(r.indicator_type, r.value, r.confidence, source);
                indicator.expires_at = r.expires_at;
                indicator
            })
            .collect())
    }
}

/// Fetch every source once; a failing source keeps its previous indicators
pub async fn refresh_feeds(cache: &ThreatFeedCache, sources: &[Arc<dyn FeedSource>]) -> usize {
    let mut loaded = 0;
    for source in sources {
        match source.fetch().await {
            Ok(indicators) => {
                let count = cache.replace_source(source.name(), indicators);
                info!(source = source.name(), indicators = count, "Threat feed refreshed");
                loaded += count;
            }
            Err(e) => warn!(source = source.name(), error = %e, "Threat feed refresh failed"),
        }
    }
    loaded
}

/// Refresh the cache from `sources` every `interval`, starting immediately
pub fn spawn_feed_refresh(
    cache: Arc<ThreatFeedCache>,
    sources: Vec<Arc<dyn FeedSource>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let loaded = refresh_feeds(&cache, &sources).await;
            debug!(loaded, cached = cache.len(), "Feed refresh cycle complete");
        }
    })
}
