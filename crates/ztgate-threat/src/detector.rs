//! Threat detector
//!
//! Aggregates the detection engines and owns the block list, incidents,
//! intel cache and alert sink.

use crate::engines::{BehaviorEngine, IntelEngine, MlEngine, SignatureEngine};
use crate::feeds::{spawn_feed_refresh, FeedSource};
use crate::{
    AlertSink, BlockList, BlockedIp, Detection, DetectionEngine, IncidentManager, IncidentStatus,
    MitigationAction, MitigationType, SecurityAlert, Severity, ThreatAssessment, ThreatConfig,
    ThreatFeedCache, ThreatIncident, ThreatResult, ThreatType, TracingAlertSink,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ztgate_common::{span_secs, AccessRequest};

#[derive(Debug, Default)]
struct Counters {
    analyzed: AtomicU64,
    detected: AtomicU64,
    blocked_hits: AtomicU64,
    auto_blocks: AtomicU64,
    alerts: AtomicU64,
    engine_errors: AtomicU64,
}

/// Detector statistics
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStats {
    /// Requests analysed
    pub requests_analyzed: u64,
    /// Requests where an engine fired
    pub threats_detected: u64,
    /// Requests refused on the blocked-IP fast path
    pub blocked_requests: u64,
    /// Automatic blocks applied
    pub auto_blocks: u64,
    /// Alerts raised
    pub alerts_sent: u64,
    /// Engine failures swallowed
    pub engine_errors: u64,
    /// Blocks currently in force
    pub active_blocks: usize,
    /// Incidents still active
    pub active_incidents: usize,
    /// Cached intel indicators
    pub cached_indicators: usize,
}

/// What one maintenance pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Expired blocks removed
    pub expired_blocks: usize,
    /// Stale incidents removed
    pub stale_incidents: usize,
    /// Expired intel indicators removed
    pub expired_indicators: usize,
    /// Idle engine state removed
    pub engine_entries: usize,
}

/// Multi-engine threat detector
pub struct ThreatDetector {
    config: ThreatConfig,
    engines: Vec<Box<dyn DetectionEngine>>,
    blocklist: BlockList,
    incidents: IncidentManager,
    feed_cache: Arc<ThreatFeedCache>,
    alert_sink: Arc<dyn AlertSink>,
    counters: Counters,
}

impl ThreatDetector {
    /// Detector with the signature, behavior, ml and intel engines
    pub fn new(config: ThreatConfig) -> ThreatResult<Self> {
        config.validate()?;
        let feed_cache = Arc::new(ThreatFeedCache::new());
        let engines: Vec<Box<dyn DetectionEngine>> = vec![
            Box::new(SignatureEngine::new()?),
            Box::new(BehaviorEngine::new(config.behavior.clone())),
            Box::new(MlEngine::new()),
            Box::new(IntelEngine::new(feed_cache.clone())),
        ];
        Ok(Self::assemble(config, engines, feed_cache))
    }

    /// Detector with a custom engine set
    pub fn with_engines(
        config: ThreatConfig,
        engines: Vec<Box<dyn DetectionEngine>>,
    ) -> ThreatResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, engines, Arc::new(ThreatFeedCache::new())))
    }

    fn assemble(
        config: ThreatConfig,
        engines: Vec<Box<dyn DetectionEngine>>,
        feed_cache: Arc<ThreatFeedCache>,
    ) -> Self {
        Self {
            config,
            engines,
            blocklist: BlockList::new(),
            incidents: IncidentManager::new(),
            feed_cache,
            alert_sink: Arc::new(TracingAlertSink),
            counters: Counters::default(),
        }
    }

    /// Deliver alerts to `sink`
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    /// Add an engine
    pub fn with_engine(mut self, engine: Box<dyn DetectionEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    /// Assess one request
    pub fn detect_threats(&self, request: &AccessRequest) -> ThreatAssessment {
        let now = request.timestamp;
        self.counters.analyzed.fetch_add(1, Ordering::Relaxed);

        if let Some(block) = self.blocklist.get(request.ip, now) {
            self.counters.blocked_hits.fetch_add(1, Ordering::Relaxed);
            debug!(ip = %request.ip, reason = %block.reason, "Request from blocked source");
            return ThreatAssessment {
                detected: true,
                score: 1.0,
                threat_type: Some(ThreatType::BlockedSource),
                severity: Severity::High,
                indicators: vec![format!("blocked:{}", block.reason)],
                should_block: true,
                should_alert: false,
                incident_id: None,
            };
        }

        let detections = self.run_engines(request);
        let Some(dominant) = detections
            .iter()
            .reduce(|best, d| if d.score > best.score { d } else { best })
        else {
            return ThreatAssessment::clean();
        };

        self.counters.detected.fetch_add(1, Ordering::Relaxed);
        let score = dominant.score;
        let threat_type = dominant.threat_type;
        let mut assessment = ThreatAssessment {
            detected: true,
            score,
            threat_type: Some(threat_type),
            severity: Severity::from_score(score),
            indicators: detections.iter().flat_map(|d| d.indicators.iter().cloned()).collect(),
            should_block: score >= self.config.block_threshold,
            should_alert: score >= self.config.alert_threshold,
            incident_id: None,
        };

        if score >= self.config.incident_threshold {
            let incident_id =
                self.incidents.record(request.ip, threat_type, score, &assessment.indicators, now);
            assessment.incident_id = Some(incident_id);
        }

        if self.config.auto_mitigation && assessment.should_block {
            self.auto_block(request.ip, threat_type, score, assessment.incident_id.as_deref(), now);
        }

        if assessment.should_alert {
            self.raise_alert(request, &assessment, threat_type, now);
        }

        info!(
            request_id = %request.request_id,
            ip = %request.ip,
            threat_type = %threat_type,
            score,
            should_block = assessment.should_block,
            "Threat detected"
        );
        assessment
    }

    fn run_engines(&self, request: &AccessRequest) -> Vec<Detection> {
        let mut detections = Vec::new();
        for engine in &self.engines {
            match engine.detect(request) {
                Ok(Some(detection)) => detections.push(detection),
                Ok(None) => {}
                Err(e) => {
                    self.counters.engine_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(engine = engine.name(), error = %e, "Detection engine failed");
                }
            }
        }
        detections
    }

    fn auto_block(
        &self,
        ip: IpAddr,
        threat_type: ThreatType,
        score: f64,
        incident_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let block = self
            .blocklist
            .block(ip, threat_type.as_str(), Some(self.config.block_duration()), score, now);
        self.counters.auto_blocks.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = incident_id {
            let action = MitigationAction {
                action_type: MitigationType::BlockIp,
                target: ip.to_string(),
                applied_at: now,
                expires_at: block.expires_at,
            };
            if let Err(e) = self.incidents.add_mitigation(id, action) {
                warn!(incident_id = %id, error = %e, "Failed to record mitigation");
            }
        }
    }

    fn raise_alert(
        &self,
        request: &AccessRequest,
        assessment: &ThreatAssessment,
        threat_type: ThreatType,
        now: DateTime<Utc>,
    ) {
        let alert = SecurityAlert {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type: threat_type,
            severity: assessment.severity,
            score: assessment.score,
            source_ip: request.ip,
            user_id: request.user_id.clone(),
            request_id: request.request_id.clone(),
            incident_id: assessment.incident_id.clone(),
            indicators: assessment.indicators.clone(),
            created_at: now,
        };
        self.counters.alerts.fetch_add(1, Ordering::Relaxed);
        self.alert_sink.send_alert(alert);
    }

    // === Operator surface ===

    /// Block `ip` manually; `None` blocks permanently
    pub fn block_ip(
        &self,
        ip: IpAddr,
        reason: impl Into<String>,
        duration: Option<Duration>,
    ) -> BlockedIp {
        self.blocklist.block(ip, reason, duration, 1.0, Utc::now())
    }

    /// Lift a block
    pub fn unblock_ip(&self, ip: IpAddr) -> bool {
        self.blocklist.unblock(ip)
    }

    /// Whether `ip` is blocked now
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.blocklist.is_blocked(ip, Utc::now())
    }

    /// Blocks currently in force
    pub fn blocked_ips(&self) -> Vec<BlockedIp> {
        self.blocklist.active(Utc::now())
    }

    /// Incident by id
    pub fn incident(&self, incident_id: &str) -> Option<ThreatIncident> {
        self.incidents.get(incident_id)
    }

    /// All incidents, newest first
    pub fn incidents(&self) -> Vec<ThreatIncident> {
        self.incidents.list()
    }

    /// Move an incident through its lifecycle
    pub fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
    ) -> ThreatResult<ThreatIncident> {
        self.incidents.update_status(incident_id, status, Utc::now())
    }

    /// Highest score among active incidents
    pub fn system_threat_level(&self) -> f64 {
        self.incidents.system_threat_level()
    }

    /// Shared intel cache
    pub fn feed_cache(&self) -> &Arc<ThreatFeedCache> {
        &self.feed_cache
    }

    /// Get detector statistics
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            requests_analyzed: self.counters.analyzed.load(Ordering::Relaxed),
            threats_detected: self.counters.detected.load(Ordering::Relaxed),
            blocked_requests: self.counters.blocked_hits.load(Ordering::Relaxed),
            auto_blocks: self.counters.auto_blocks.load(Ordering::Relaxed),
            alerts_sent: self.counters.alerts.load(Ordering::Relaxed),
            engine_errors: self.counters.engine_errors.load(Ordering::Relaxed),
            active_blocks: self.blocklist.active(Utc::now()).len(),
            active_incidents: self.incidents.active_count(),
            cached_indicators: self.feed_cache.len(),
        }
    }

    // === Maintenance ===

    /// Remove expired blocks
    pub fn cleanup_expired_blocks(&self, now: DateTime<Utc>) -> usize {
        self.blocklist.cleanup_expired(now)
    }

    /// Remove resolved/closed incidents older than the retention period
    pub fn cleanup_stale_incidents(&self, now: DateTime<Utc>) -> usize {
        self.incidents.cleanup_stale(now, self.config.incident_retention())
    }

    /// One full maintenance pass
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let report = MaintenanceReport {
            expired_blocks: self.cleanup_expired_blocks(now),
            stale_incidents: self.cleanup_stale_incidents(now),
            expired_indicators: self.feed_cache.purge_expired(now),
            engine_entries: self.engines.iter().map(|e| e.maintain(now)).sum(),
        };
        info!(
            expired_blocks = report.expired_blocks,
            stale_incidents = report.stale_incidents,
            expired_indicators = report.expired_indicators,
            "Threat maintenance complete"
        );
        report
    }

    /// Run maintenance every configured interval
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        let period = detector.config.maintenance_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                detector.run_maintenance(Utc::now());
            }
        })
    }

    /// Refresh the intel cache from `sources` every configured interval
    pub fn spawn_feed_refresh(&self, sources: Vec<Arc<dyn FeedSource>>) -> JoinHandle<()> {
        spawn_feed_refresh(self.feed_cache.clone(), sources, self.config.feed_refresh_interval())
    }

    /// Expiry a fresh automatic block would get at `now`
    pub fn auto_block_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + span_secs(self.config.block_duration_secs)
    }
}
