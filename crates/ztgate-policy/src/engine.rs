//! Policy evaluation over the current snapshot

use crate::store::{CompiledPolicy, PolicyStore};
use crate::{
    ActionType, Obligation, PolicyAction, PolicyDecision, PolicyError, PolicyResult, SecurityPolicy,
    PARAM_REASON,
};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use ztgate_common::{AccessRequest, LocalClock};

/// Everything a condition may inspect
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Request under evaluation
    pub request: &'a AccessRequest,
    /// Composite risk score, [0,1]
    pub risk_score: f64,
    /// Device trust score, [0,1]
    pub device_trust: f64,
    /// Local clock used by time-of-day conditions
    pub clock: LocalClock,
}

impl<'a> PolicyContext<'a> {
    /// Context evaluated against a UTC clock
    pub fn new(request: &'a AccessRequest, risk_score: f64, device_trust: f64) -> Self {
        Self {
            request,
            risk_score,
            device_trust,
            clock: LocalClock::utc(),
        }
    }

    /// Use a deployment-local clock
    pub fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> PolicyResult<()> {
        let scores = [("risk_score", self.risk_score), ("device_trust", self.device_trust)];
        for (name, value) in scores {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                let reason = format!("{name} = {value} is outside [0,1]");
                return Err(PolicyError::InvalidContext(reason));
            }
        }
        Ok(())
    }
}

/// Declarative policy engine
///
/// Evaluation never blocks: it works on a snapshot loaded from the store,
/// while administration swaps in a new snapshot.
pub struct PolicyEngine {
    store: Arc<PolicyStore>,

    // Metrics
    evaluations: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    default_denies: AtomicU64,
}

impl PolicyEngine {
    /// Create engine with no policies
    pub fn new() -> Self {
        Self::with_store(Arc::new(PolicyStore::new()))
    }

    /// Create engine over an existing store
    pub fn with_store(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            evaluations: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            default_denies: AtomicU64::new(0),
        }
    }

    /// Add a policy; ids must be unique
    pub fn add_policy(&self, policy: SecurityPolicy) -> PolicyResult<()> {
        let id = policy.id.clone();
        self.store.add(policy)?;
        info!(policy_id = %id, version = self.store.version(), "Policy added");
        Ok(())
    }

    /// Replace an existing policy
    pub fn update_policy(&self, mut policy: SecurityPolicy) -> PolicyResult<()> {
        policy.updated_at = chrono::Utc::now();
        let id = policy.id.clone();
        self.store.update(policy)?;
        info!(policy_id = %id, version = self.store.version(), "Policy updated");
        Ok(())
    }

    /// Delete a policy
    pub fn delete_policy(&self, policy_id: &str) -> PolicyResult<SecurityPolicy> {
        let removed = self.store.remove(policy_id)?;
        info!(policy_id = %policy_id, version = self.store.version(), "Policy deleted");
        Ok(removed)
    }

    /// Get a policy by id
    pub fn get_policy(&self, policy_id: &str) -> Option<SecurityPolicy> {
        self.store.get(policy_id)
    }

    /// All policies in evaluation order
    pub fn list_policies(&self) -> Vec<SecurityPolicy> {
        self.store.list()
    }

    /// Replace every policy at once
    pub fn load_policies(&self, policies: Vec<SecurityPolicy>) -> PolicyResult<()> {
        let count = policies.len();
        self.store.replace_all(policies)?;
        info!(count, version = self.store.version(), "Policies loaded");
        Ok(())
    }

    /// Replace every policy with the JSON array stored at `path`
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> PolicyResult<()> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let policies: Vec<SecurityPolicy> = serde_json::from_str(&content)?;
        self.load_policies(policies)
    }

    /// Evaluate every matching policy and merge their actions
    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> PolicyResult<PolicyDecision> {
        ctx.validate()?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.store.snapshot();
        let mut merge = Merge::default();

        for policy in snapshot.iter() {
            if !policy.source.enabled || !policy.conditions.iter().all(|c| c.evaluate(ctx)) {
                continue;
            }
            merge.matched_policies.push(policy.source.id.clone());
            apply_rules(policy, ctx, &mut merge);
        }

        let decision = merge.finish();
        if decision.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
        if decision.matched_rules.is_empty() {
            self.default_denies.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            request_id = %ctx.request.request_id,
            allowed = decision.allowed,
            requires_mfa = decision.requires_mfa,
            matched = decision.matched_rules.len(),
            "Policy evaluated"
        );
        Ok(decision)
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            unmatched: self.default_denies.load(Ordering::Relaxed),
            policies_loaded: self.store.len(),
            version: self.store.version(),
        }
    }

    /// Get policy store reference
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Evaluations performed
    pub evaluations: u64,
    /// Decisions that granted access
    pub allowed: u64,
    /// Decisions that refused access
    pub denied: u64,
    /// Evaluations where no rule fired
    pub unmatched: u64,
    /// Policies in the current snapshot
    pub policies_loaded: usize,
    /// Snapshot version
    pub version: u64,
}

fn apply_rules(policy: &CompiledPolicy, ctx: &PolicyContext<'_>, merge: &mut Merge) {
    for rule in policy.rules.iter().filter(|r| r.enabled) {
        if !rule.conditions.iter().all(|c| c.evaluate(ctx)) {
            continue;
        }
        merge.matched_rules.push(format!("{}/{}", policy.source.id, rule.id));
        for action in &rule.actions {
            merge.add(&policy.source.id, &rule.id, action);
        }
    }
}

/// Accumulates contributed actions; the outcome is order independent except
/// for reason ties, which go to the first contributor in evaluation order.
#[derive(Default)]
struct Merge {
    matched_policies: Vec<String>,
    matched_rules: Vec<String>,
    any_allow: bool,
    any_deny: bool,
    any_mfa: bool,
    winner: Option<(u8, String)>,
    session_ttl: Option<Duration>,
    obligations: Vec<Obligation>,
}

impl Merge {
    fn add(&mut self, policy_id: &str, rule_id: &str, action: &PolicyAction) {
        if let Some(ttl) = action.session_ttl() {
            self.session_ttl = Some(self.session_ttl.map_or(ttl, |current| current.min(ttl)));
        }

        match action.action_type {
            ActionType::Allow => self.any_allow = true,
            ActionType::Deny | ActionType::Block => self.any_deny = true,
            ActionType::RequireMfa => {
                self.any_mfa = true;
                return;
            }
            ActionType::Log | ActionType::Alert | ActionType::Redirect | ActionType::RateLimit => {
                self.obligations.push(Obligation {
                    action: action.action_type,
                    policy_id: policy_id.to_string(),
                    rule_id: rule_id.to_string(),
                    params: action.params.clone(),
                });
                return;
            }
        }

        let rank = action.action_type.precedence();
        if self.winner.as_ref().map_or(true, |(best, _)| rank > *best) {
            let reason = match action.params.get(PARAM_REASON) {
                Some(reason) => reason.clone(),
                None if action.action_type == ActionType::Allow => {
                    format!("allowed by {policy_id}/{rule_id}")
                }
                None => format!("denied by {policy_id}/{rule_id}"),
            };
            self.winner = Some((rank, reason));
        }
    }

    fn finish(self) -> PolicyDecision {
        let mut decision = match self.winner {
            None => PolicyDecision::default_deny(),
            Some((_, reason)) => PolicyDecision {
                allowed: self.any_allow && !self.any_deny,
                requires_mfa: self.any_mfa,
                reason,
                ..PolicyDecision::default_deny()
            },
        };
        decision.session_ttl = self.session_ttl;
        decision.matched_policies = self.matched_policies;
        decision.matched_rules = self.matched_rules;
        decision.obligations = self.obligations;
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConditionField, Operator, PolicyCondition, PolicyRule, PARAM_SESSION_TTL_SECS};
    use proptest::prelude::*;

    fn request() -> AccessRequest {
        AccessRequest::new("dev-1", "10.0.0.5".parse().unwrap(), "Mozilla/5.0", "orders", "read")
            .with_user("alice")
    }

    fn allow_policy(id: &str, priority: i32) -> SecurityPolicy {
        SecurityPolicy::new(id, id, priority)
            .rule(PolicyRule::new("allow").then(PolicyAction::allow()))
    }

    fn mfa_policy() -> SecurityPolicy {
        SecurityPolicy::new("mfa", "mfa", 0)
            .rule(PolicyRule::new("r").then(PolicyAction::require_mfa()))
    }

    fn deny_policy(id: &str, priority: i32) -> SecurityPolicy {
        SecurityPolicy::new(id, id, priority)
            .rule(PolicyRule::new("deny").then(PolicyAction::deny("orders frozen")))
    }

    fn evaluate(engine: &PolicyEngine, req: &AccessRequest) -> PolicyDecision {
        engine.evaluate(&PolicyContext::new(req, 0.2, 0.9)).unwrap()
    }

    #[test]
    fn test_empty_engine_default_denies_with_mfa() {
        let engine = PolicyEngine::new();
        let decision = evaluate(&engine, &request());
        assert!(!decision.allowed);
        assert!(decision.requires_mfa);
        assert_eq!(decision, PolicyDecision::default_deny());
        assert_eq!(engine.stats().unmatched, 1);
    }

    #[test]
    fn test_policy_without_conditions_matches_vacuously() {
        let engine = PolicyEngine::new();
        engine.add_policy(allow_policy("open", 0)).unwrap();

        let decision = evaluate(&engine, &request());
        assert!(decision.allowed);
        assert!(!decision.requires_mfa);
        assert_eq!(decision.matched_policies, vec!["open"]);
        assert_eq!(decision.matched_rules, vec!["open/allow"]);
    }

    #[test]
    fn test_deny_beats_allow_in_either_priority_order() {
        for (allow_prio, deny_prio) in [(100, 1), (1, 100)] {
            let engine = PolicyEngine::new();
            engine.add_policy(allow_policy("allow", allow_prio)).unwrap();
            engine.add_policy(deny_policy("deny", deny_prio)).unwrap();

            let decision = evaluate(&engine, &request());
            assert!(!decision.allowed);
            assert_eq!(decision.reason, "orders frozen");
            assert_eq!(decision.matched_policies.len(), 2);
        }
    }

    #[test]
    fn test_require_mfa_alone_is_not_decisive() {
        let engine = PolicyEngine::new();
        engine.add_policy(mfa_policy()).unwrap();

        let decision = evaluate(&engine, &request());
        assert!(!decision.allowed);
        assert!(decision.requires_mfa);
        assert_eq!(decision.matched_rules, vec!["mfa/r"]);
    }

    #[test]
    fn test_allow_with_mfa() {
        let engine = PolicyEngine::new();
        engine.add_policy(allow_policy("allow", 0)).unwrap();
        engine.add_policy(mfa_policy()).unwrap();

        let decision = evaluate(&engine, &request());
        assert!(decision.allowed);
        assert!(decision.requires_mfa);
    }

    #[test]
    fn test_evaluation_order_reported() {
        let engine = PolicyEngine::new();
        engine.add_policy(allow_policy("b", 5)).unwrap();
        engine.add_policy(allow_policy("a", 5)).unwrap();
        engine.add_policy(allow_policy("top", 9)).unwrap();

        let decision = evaluate(&engine, &request());
        assert_eq!(decision.matched_policies, vec!["top", "a", "b"]);
        assert_eq!(decision.reason, "allowed by top/allow");
    }

    #[test]
    fn test_smallest_session_ttl_wins() {
        let engine = PolicyEngine::new();
        let long = PolicyAction::allow().with_param(PARAM_SESSION_TTL_SECS, "900");
        let short = PolicyAction::new(ActionType::Log).with_param(PARAM_SESSION_TTL_SECS, "600");
        engine
            .add_policy(SecurityPolicy::new("a", "a", 0).rule(PolicyRule::new("r").then(long)))
            .unwrap();
        engine
            .add_policy(SecurityPolicy::new("b", "b", 0).rule(PolicyRule::new("r").then(short)))
            .unwrap();

        let decision = evaluate(&engine, &request());
        assert_eq!(decision.session_ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_obligations_collected() {
        let engine = PolicyEngine::new();
        let limit =
            PolicyAction::new(ActionType::RateLimit).with_param(crate::PARAM_LIMIT, "100/min");
        engine
            .add_policy(
                SecurityPolicy::new("p", "p", 0).rule(
                    PolicyRule::new("r")
                        .then(PolicyAction::allow())
                        .then(PolicyAction::new(ActionType::Log))
                        .then(limit),
                ),
            )
            .unwrap();

        let decision = evaluate(&engine, &request());
        assert!(decision.allowed);
        assert_eq!(decision.obligations.len(), 2);
        assert_eq!(decision.obligations[1].action, ActionType::RateLimit);
        let params = &decision.obligations[1].params;
        assert_eq!(params.get("limit").map(String::as_str), Some("100/min"));
    }

    #[test]
    fn test_disabled_policy_and_rule_are_skipped() {
        let engine = PolicyEngine::new();
        let mut disabled = deny_policy("off", 10);
        disabled.enabled = false;
        engine.add_policy(disabled).unwrap();

        let mut rule = PolicyRule::new("deny").then(PolicyAction::deny("nope"));
        rule.enabled = false;
        engine
            .add_policy(allow_policy("on", 0).rule(rule))
            .unwrap();

        let decision = evaluate(&engine, &request());
        assert!(decision.allowed);
        assert_eq!(decision.matched_policies, vec!["on"]);
    }

    #[test]
    fn test_top_level_conditions_gate_rules() {
        let engine = PolicyEngine::new();
        let root_only = PolicyCondition::new(ConditionField::UserId, Operator::Equals, "root");
        engine.add_policy(allow_policy("admins", 0).when(root_only)).unwrap();

        let decision = evaluate(&engine, &request());
        assert!(!decision.allowed);
        assert!(decision.matched_policies.is_empty());
    }

    #[test]
    fn test_risk_condition_uses_context() {
        let engine = PolicyEngine::new();
        let risky = PolicyCondition::new(ConditionField::RiskScore, Operator::GreaterThan, 0.5);
        engine
            .add_policy(
                SecurityPolicy::new("risky", "risky", 0).rule(
                    PolicyRule::new("r")
                        .when(risky)
                        .then(PolicyAction::block("risk too high")),
                ),
            )
            .unwrap();
        engine.add_policy(allow_policy("base", 0)).unwrap();

        let req = request();
        let low = engine.evaluate(&PolicyContext::new(&req, 0.2, 0.9)).unwrap();
        let high = engine.evaluate(&PolicyContext::new(&req, 0.8, 0.9)).unwrap();
        assert!(low.allowed);
        assert!(!high.allowed);
        assert_eq!(high.reason, "risk too high");
    }

    #[test]
    fn test_invalid_context_rejected() {
        let engine = PolicyEngine::new();
        let req = request();
        assert!(matches!(
            engine.evaluate(&PolicyContext::new(&req, f64::NAN, 0.5)),
            Err(PolicyError::InvalidContext(_))
        ));
        assert!(engine.evaluate(&PolicyContext::new(&req, 0.5, 1.5)).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let file = format!("ztgate-policies-{}.json", std::process::id());
        let path = std::env::temp_dir().join(file);
        std::fs::write(
            &path,
            r#"[
                { "id": "office", "name": "Office network", "priority": 10,
                  "conditions": [ { "field": "ip", "operator": "in", "value": ["10.0.0.0/8"] } ],
                  "rules": [ { "id": "r1", "actions": [
                      { "type": "allow", "params": { "session_ttl_secs": "1200" } } ] } ] }
            ]"#,
        )
        .unwrap();

        let engine = PolicyEngine::new();
        engine.load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let decision = evaluate(&engine, &request());
        assert!(decision.allowed);
        assert_eq!(decision.session_ttl, Some(Duration::from_secs(1200)));
        assert_eq!(engine.list_policies().len(), 1);
    }

    #[test]
    fn test_load_from_missing_file() {
        let engine = PolicyEngine::new();
        assert!(matches!(
            engine.load_from_file("/nonexistent/ztgate/policies.json"),
            Err(PolicyError::Io(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_deny_wins_regardless_of_priorities(
            priorities in proptest::collection::vec(-100i32..100, 1..6),
            deny_prio in -100i32..100,
        ) {
            let engine = PolicyEngine::new();
            for (i, prio) in priorities.iter().enumerate() {
                engine.add_policy(allow_policy(&format!("allow-{i}"), *prio)).unwrap();
            }
            engine.add_policy(deny_policy("deny", deny_prio)).unwrap();

            let decision = evaluate(&engine, &request());
            prop_assert!(!decision.allowed);
            prop_assert_eq!(decision.reason, "orders frozen".to_string());
        }
    }
}
