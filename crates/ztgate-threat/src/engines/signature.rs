//! Signature engine
//!
//! Compiled regex signatures over the request's resource, action, user
//! agent and context values.

use super::{Detection, DetectionEngine};
use crate::{ThreatError, ThreatResult, ThreatType};
use regex::Regex;
use ztgate_common::AccessRequest;

const ENGINE: &str = "signature";

/// Which request fields a signature inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureTarget {
    /// Resource, action and context values
    Payload,
    /// User agent only
    UserAgent,
}

/// A compiled detection signature
#[derive(Debug, Clone)]
pub struct Signature {
    /// Stable id reported as evidence
    pub id: &'static str,
    /// Threat recognised by a match
    pub threat_type: ThreatType,
    /// Score of a match
    pub score: f64,
    target: SignatureTarget,
    pattern: Regex,
}

impl Signature {
    /// Compile a signature
    pub fn new(
        id: &'static str,
        threat_type: ThreatType,
        score: f64,
        target: SignatureTarget,
        pattern: &str,
    ) -> ThreatResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| ThreatError::Engine {
            engine: ENGINE,
            reason: format!("signature {id}: {e}"),
        })?;
        Ok(Self {
            id,
            threat_type,
            score,
            target,
            pattern,
        })
    }

    fn matches(&self, request: &AccessRequest) -> bool {
        match self.target {
            SignatureTarget::UserAgent => self.pattern.is_match(&request.user_agent),
            SignatureTarget::Payload => {
                self.pattern.is_match(&request.resource)
                    || self.pattern.is_match(&request.action)
                    || request.context.values().any(|v| self.pattern.is_match(v))
            }
        }
    }
}

const BUILTIN: &[(&str, ThreatType, f64, SignatureTarget, &str)] = &[
    (
        "sqli-union-select",
        ThreatType::SqlInjection,
        0.9,
        SignatureTarget::Payload,
        r"(?i)\bunion\b.{0,40}\bselect\b",
    ),
    (
        "sqli-tautology",
        ThreatType::SqlInjection,
        0.85,
        SignatureTarget::Payload,
        r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
    ),
    (
        "sqli-stacked",
        ThreatType::SqlInjection,
        0.9,
        SignatureTarget::Payload,
        r"(?i);\s*(drop|delete|insert|update|truncate|alter)\s",
    ),
    (
        "sqli-comment",
        ThreatType::SqlInjection,
        0.7,
        SignatureTarget::Payload,
        r#"['"]\s*(--|#|/\*)"#,
    ),
    (
        "xss-script-tag",
        ThreatType::CrossSiteScripting,
        0.85,
        SignatureTarget::Payload,
        r"(?i)<\s*/?\s*script\b",
    ),
    (
        "xss-event-handler",
        ThreatType::CrossSiteScripting,
        0.75,
        SignatureTarget::Payload,
        r"(?i)\bon(error|load|mouseover|focus|click)\s*=",
    ),
    (
        "xss-js-uri",
        ThreatType::CrossSiteScripting,
        0.7,
        SignatureTarget::Payload,
        r"(?i)javascript\s*:",
    ),
    (
        "traversal-dotdot",
        ThreatType::PathTraversal,
        0.8,
        SignatureTarget::Payload,
        r"(?i)(\.\./|\.\.\\|%2e%2e(%2f|%5c|/|\\))",
    ),
    (
        "traversal-sensitive-file",
        ThreatType::PathTraversal,
        0.9,
        SignatureTarget::Payload,
        r"(?i)(/etc/(passwd|shadow)|win\.ini|boot\.ini)",
    ),
    (
        "cmdi-shell",
        ThreatType::CommandInjection,
        0.85,
        SignatureTarget::Payload,
        r"(?i)(;|\||&&|\$\(|`)\s*(cat|ls|wget|curl|nc|bash|sh|powershell|whoami|id|uname)\b",
    ),
    (
        "scanner-user-agent",
        ThreatType::Scanner,
        0.75,
        SignatureTarget::UserAgent,
        r"(?i)(sqlmap|nikto|nmap|masscan|acunetix|nessus|dirbuster|gobuster|wpscan|zgrab)",
    ),
];

/// Regex signature engine
pub struct SignatureEngine {
    signatures: Vec<Signature>,
}

impl SignatureEngine {
    /// Engine loaded with the built-in signature set
    pub fn new() -> ThreatResult<Self> {
        let signatures = BUILTIN
            .iter()
            .map(|(id, threat_type, score, target, pattern)| {
                Signature::new(*id, *threat_type, *score, *target, pattern)
            })
            .collect::<ThreatResult<Vec<_>>>()?;
        Ok(Self { signatures })
    }

    /// Engine with a custom signature set
    pub fn with_signatures(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    /// Number of loaded signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Check if no signatures are loaded
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl DetectionEngine for SignatureEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn detect(&self, request: &AccessRequest) -> ThreatResult<Option<Detection>> {
        let mut best: Option<&Signature> = None;
        let mut evidence = Vec::new();

        for sig in self.signatures.iter().filter(|s| s.matches(request)) {
            evidence.push(format!("{ENGINE}:{}", sig.id));
            if best.map_or(true, |b| sig.score > b.score) {
                best = Some(sig);
            }
        }

        Ok(best.map(|sig| {
            let mut detection = Detection::new(ENGINE, sig.threat_type, sig.score);
            detection.indicators = evidence;
            detection
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(resource: &str, user_agent: &str) -> AccessRequest {
        AccessRequest::new("dev-1", "198.51.100.7".parse().unwrap(), user_agent, resource, "read")
    }

    fn detect(resource: &str, user_agent: &str) -> Option<Detection> {
        SignatureEngine::new().unwrap().detect(&request(resource, user_agent)).unwrap()
    }

    #[test]
    fn test_builtin_signatures_compile() {
        let engine = SignatureEngine::new().unwrap();
        assert_eq!(engine.len(), BUILTIN.len());
    }

    #[test]
    fn test_clean_request_passes() {
        assert!(detect("/api/v1/orders/42", "Mozilla/5.0 (X11; Linux x86_64)").is_none());
        assert!(detect("reports/quarterly-2026", "Mozilla/5.0").is_none());
    }

    #[test]
    fn test_sql_injection() {
        let d = detect("/items?id=1 UNION ALL SELECT password FROM users", "Mozilla/5.0").unwrap();
        assert_eq!(d.threat_type, ThreatType::SqlInjection);
        assert_eq!(d.score, 0.9);
        assert!(d.indicators.contains(&"signature:sqli-union-select".to_string()));

        let d = detect("/login?user=admin' OR '1'='1", "Mozilla/5.0").unwrap();
        assert_eq!(d.threat_type, ThreatType::SqlInjection);
    }

    #[test]
    fn test_xss_and_traversal() {
        let d = detect("/search?q=<script>alert(1)</script>", "Mozilla/5.0").unwrap();
        assert_eq!(d.threat_type, ThreatType::CrossSiteScripting);

        let d = detect("/static/../../etc/passwd", "Mozilla/5.0").unwrap();
        assert_eq!(d.threat_type, ThreatType::PathTraversal);
        assert_eq!(d.score, 0.9);
        assert_eq!(d.indicators.len(), 2);
    }

    #[test]
    fn test_command_injection_in_context() {
        let req = request("/ping", "Mozilla/5.0").with_context("host", "127.0.0.1; cat /tmp/x");
        let d = SignatureEngine::new().unwrap().detect(&req).unwrap().unwrap();
        assert_eq!(d.threat_type, ThreatType::CommandInjection);
    }

    #[test]
    fn test_scanner_user_agent() {
        let d = detect("/", "sqlmap/1.7.2#stable (https://sqlmap.org)").unwrap();
        assert_eq!(d.threat_type, ThreatType::Scanner);
        assert_eq!(d.score, 0.75);
    }
}
