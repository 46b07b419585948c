//! Declarative Access Policy Engine
//!
//! Policies are evaluated against a request plus its computed risk context.
//!
//! # Evaluation model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  snapshot (priority desc, id asc)                            │
//! │                                                              │
//! │  policy ──► top-level conditions (AND) ──► match?            │
//! │                                               │ yes          │
//! │                                               ▼              │
//! │                 rules ──► rule conditions (AND) ──► actions  │
//! │                                                              │
//! │  actions ──► precedence lattice ──► PolicyDecision           │
//! │   Deny/Block  >  RequireMfa  >  Allow  >  Log/Alert          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing decisive matched ⇒ deny with MFA required.

#![warn(missing_docs)]

pub mod condition;
pub mod engine;
pub mod error;
pub mod store;

pub use condition::CompiledCondition;
pub use engine::{EngineStats, PolicyContext, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
pub use store::PolicyStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Parameter naming the human readable reason of a deny/block
pub const PARAM_REASON: &str = "reason";
/// Parameter capping the session lifetime, in seconds
pub const PARAM_SESSION_TTL_SECS: &str = "session_ttl_secs";
/// Parameter naming the redirect target
pub const PARAM_TARGET: &str = "target";
/// Parameter naming a rate limit, e.g. `100/min`
pub const PARAM_LIMIT: &str = "limit";

fn enabled() -> bool {
    true
}

/// Declarative authorization unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Disabled policies are skipped
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Higher evaluates first
    #[serde(default)]
    pub priority: i32,
    /// ANDed; an empty list matches every request
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    /// Rules contributing actions once the policy matches
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SecurityPolicy {
    /// Create an enabled policy with no conditions or rules
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            priority,
            conditions: Vec::new(),
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a top-level condition
    pub fn when(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a rule
    pub fn rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Conditional group of actions inside a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule id, unique within its policy
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Disabled rules contribute nothing
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// ANDed; an empty list always fires
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    /// Actions contributed when the rule fires
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
}

impl PolicyRule {
    /// Create an enabled rule
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Add a condition
    pub fn when(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an action
    pub fn then(mut self, action: PolicyAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Single predicate over the request or its risk context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    /// Attribute to inspect
    pub field: ConditionField,
    /// Comparison
    pub operator: Operator,
    /// Right-hand side
    pub value: ConditionValue,
    /// Invert the result of a known comparison
    #[serde(default)]
    pub negate: bool,
}

impl PolicyCondition {
    /// Create a non-negated condition
    pub fn new(
        field: ConditionField,
        operator: Operator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            negate: false,
        }
    }

    /// Invert the condition
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

/// Attribute a condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Authenticated user id
    UserId,
    /// Any of the request roles
    Role,
    /// Source address
    Ip,
    /// Local time of day
    TimeOfDay,
    /// Target resource
    Resource,
    /// Action verb
    Action,
    /// Composite risk score
    RiskScore,
    /// Device trust score
    DeviceTrust,
    /// Caller location
    Location,
    /// Anything this engine does not understand; never matches
    #[serde(other)]
    Unknown,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Exact equality
    Equals,
    /// Exact inequality
    NotEquals,
    /// Substring, or CIDR containment for IPs
    Contains,
    /// Negated `Contains`
    NotContains,
    /// Numeric / time greater-than
    GreaterThan,
    /// Numeric / time less-than
    LessThan,
    /// Regular expression match
    Regex,
    /// Membership in a list
    In,
    /// Non-membership in a list
    NotIn,
    /// Anything this engine does not understand; never matches
    #[serde(other)]
    Unknown,
}

/// Condition right-hand side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Numeric literal
    Number(f64),
    /// String literal
    Text(String),
    /// List literal
    List(Vec<String>),
}

impl ConditionValue {
    /// Items of the value viewed as a list
    pub fn items(&self) -> Vec<String> {
        match self {
            ConditionValue::Number(n) => vec![n.to_string()],
            ConditionValue::Text(t) => vec![t.clone()],
            ConditionValue::List(l) => l.clone(),
        }
    }
}

impl From<f64> for ConditionValue {
    fn from(v: f64) -> Self {
        ConditionValue::Number(v)
    }
}

impl From<&str> for ConditionValue {
    fn from(v: &str) -> Self {
        ConditionValue::Text(v.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(v: String) -> Self {
        ConditionValue::Text(v)
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(v: Vec<&str>) -> Self {
        ConditionValue::List(v.into_iter().map(String::from).collect())
    }
}

/// Action contributed by a firing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    /// What to do
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Action parameters (`reason`, `target`, `limit`, `session_ttl_secs`)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl PolicyAction {
    /// Bare action with no parameters
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: HashMap::new(),
        }
    }

    /// Allow
    pub fn allow() -> Self {
        Self::new(ActionType::Allow)
    }

    /// Deny with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(ActionType::Deny).with_param(PARAM_REASON, reason)
    }

    /// Block with a reason
    pub fn block(reason: impl Into<String>) -> Self {
        Self::new(ActionType::Block).with_param(PARAM_REASON, reason)
    }

    /// Require MFA
    pub fn require_mfa() -> Self {
        Self::new(ActionType::RequireMfa)
    }

    /// Attach a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Session lifetime cap carried by this action, if any
    pub fn session_ttl(&self) -> Option<Duration> {
        self.params
            .get(PARAM_SESSION_TTL_SECS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Kind of policy action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Grant access
    Allow,
    /// Refuse access
    Deny,
    /// Require a second factor
    RequireMfa,
    /// Request an audit log entry
    Log,
    /// Request an operator alert
    Alert,
    /// Refuse access and flag the source
    Block,
    /// Send the caller elsewhere
    Redirect,
    /// Apply a rate limit
    RateLimit,
}

impl ActionType {
    /// Position in the precedence lattice; higher wins
    pub fn precedence(self) -> u8 {
        match self {
            ActionType::Deny | ActionType::Block => 3,
            ActionType::RequireMfa => 2,
            ActionType::Allow => 1,
            ActionType::Log | ActionType::Alert | ActionType::Redirect | ActionType::RateLimit => 0,
        }
    }

    /// Whether the action decides allow/deny
    pub fn is_decisive(self) -> bool {
        matches!(self, ActionType::Allow | ActionType::Deny | ActionType::Block)
    }
}

/// Non-decisive action the caller is expected to honour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    /// Action kind (log, alert, redirect, rate limit)
    pub action: ActionType,
    /// Policy that contributed it
    pub policy_id: String,
    /// Rule that contributed it
    pub rule_id: String,
    /// Action parameters
    pub params: HashMap<String, String>,
}

/// Result of a policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether policy grants access
    pub allowed: bool,
    /// Whether policy demands a second factor
    pub requires_mfa: bool,
    /// Smallest session lifetime cap among contributing actions
    pub session_ttl: Option<Duration>,
    /// Matching policy ids in evaluation order
    pub matched_policies: Vec<String>,
    /// Firing rules as `policy_id/rule_id`, in evaluation order
    pub matched_rules: Vec<String>,
    /// Explanation taken from the winning decisive action
    pub reason: String,
    /// Log/alert/redirect/rate-limit requests
    pub obligations: Vec<Obligation>,
}

impl PolicyDecision {
    /// Fail-closed decision used when nothing decisive matched
    pub fn default_deny() -> Self {
        Self {
            allowed: false,
            requires_mfa: true,
            session_ttl: None,
            matched_policies: Vec::new(),
            matched_rules: Vec::new(),
            reason: "no policy granted access (default deny)".to_string(),
            obligations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_json_defaults() {
        let json = r#"{
            "id": "p1",
            "name": "Trading desk",
            "rules": [
                { "id": "r1", "actions": [ { "type": "allow" } ] }
            ]
        }"#;
        let policy: SecurityPolicy = serde_json::from_str(json).unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.priority, 0);
        assert!(policy.conditions.is_empty());
        assert!(policy.rules[0].enabled);
        assert_eq!(policy.rules[0].actions[0].action_type, ActionType::Allow);
    }

    #[test]
    fn test_unknown_field_and_operator_deserialize() {
        let json = r#"{ "field": "phase_of_moon", "operator": "approximately", "value": "full" }"#;
        let cond: PolicyCondition = serde_json::from_str(json).unwrap();
        assert_eq!(cond.field, ConditionField::Unknown);
        assert_eq!(cond.operator, Operator::Unknown);
    }

    #[test]
    fn test_condition_value_shapes() {
        let n: ConditionValue = serde_json::from_str("0.7").unwrap();
        let t: ConditionValue = serde_json::from_str("\"trader\"").unwrap();
        let l: ConditionValue = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(n, ConditionValue::Number(0.7));
        assert_eq!(t, ConditionValue::Text("trader".into()));
        assert_eq!(l.items(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_precedence_lattice() {
        assert!(ActionType::Deny.precedence() > ActionType::RequireMfa.precedence());
        assert_eq!(ActionType::Deny.precedence(), ActionType::Block.precedence());
        assert!(ActionType::RequireMfa.precedence() > ActionType::Allow.precedence());
        assert!(ActionType::Allow.precedence() > ActionType::Log.precedence());
        assert!(!ActionType::RequireMfa.is_decisive());
    }

    #[test]
    fn test_session_ttl_param() {
        let action = PolicyAction::allow().with_param(PARAM_SESSION_TTL_SECS, "600");
        assert_eq!(action.session_ttl(), Some(Duration::from_secs(600)));
        let garbled = PolicyAction::allow().with_param(PARAM_SESSION_TTL_SECS, "ten");
        assert_eq!(garbled.session_ttl(), None);
    }
}
