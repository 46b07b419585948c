//! Lock-free policy store with hot-swapping
//!
//! Readers load an immutable snapshot; writers rebuild and swap it under a
//! writer mutex so concurrent administration cannot lose updates.

use crate::condition::CompiledCondition;
use crate::{PolicyAction, PolicyError, PolicyResult, SecurityPolicy};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Policy with compiled conditions
#[derive(Debug)]
pub struct CompiledPolicy {
    /// Policy as written
    pub source: SecurityPolicy,
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) rules: Vec<CompiledRule>,
}

#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub(crate) id: String,
    pub(crate) enabled: bool,
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) actions: Vec<PolicyAction>,
}

impl CompiledPolicy {
    /// Validate and compile a policy
    pub fn compile(policy: SecurityPolicy) -> PolicyResult<Self> {
        if policy.id.trim().is_empty() {
            return Err(PolicyError::invalid(&policy.id, "policy id must not be empty"));
        }

        let conditions = policy
            .conditions
            .iter()
            .map(|c| CompiledCondition::compile(&policy.id, c))
            .collect::<PolicyResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(policy.rules.len());
        for rule in &policy.rules {
            if rule.id.trim().is_empty() {
                return Err(PolicyError::invalid(&policy.id, "rule id must not be empty"));
            }
            if !seen.insert(rule.id.as_str()) {
                let reason = format!("duplicate rule id {}", rule.id);
                return Err(PolicyError::invalid(&policy.id, reason));
            }
            rules.push(CompiledRule {
                id: rule.id.clone(),
                enabled: rule.enabled,
                conditions: rule
                    .conditions
                    .iter()
                    .map(|c| CompiledCondition::compile(&policy.id, c))
                    .collect::<PolicyResult<Vec<_>>>()?,
                actions: rule.actions.clone(),
            });
        }

        Ok(Self {
            source: policy,
            conditions,
            rules,
        })
    }
}

/// Immutable, evaluation-ordered view of all policies
#[derive(Debug, Default)]
pub struct PolicySet {
    ordered: Vec<Arc<CompiledPolicy>>,
    by_id: HashMap<String, Arc<CompiledPolicy>>,
}

impl PolicySet {
    fn from_policies(policies: impl IntoIterator<Item = Arc<CompiledPolicy>>) -> Self {
        let mut ordered: Vec<_> = policies.into_iter().collect();
        // Deterministic: priority desc, then id asc
        ordered.sort_by(|a, b| {
            b.source
                .priority
                .cmp(&a.source.priority)
                .then_with(|| a.source.id.cmp(&b.source.id))
        });
        let by_id = ordered.iter().map(|p| (p.source.id.clone(), p.clone())).collect();
        Self { ordered, by_id }
    }

    /// Policies in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledPolicy>> {
        self.ordered.iter()
    }

    /// Number of policies
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Policy store with atomic snapshot updates
pub struct PolicyStore {
    snapshot: ArcSwap<PolicySet>,
    version: AtomicU64,
    writer: Mutex<()>,
}

impl PolicyStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PolicySet::default()),
            version: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Get current version
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current snapshot
    #[inline]
    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.snapshot.load_full()
    }

    /// Get number of policies
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Insert a new policy; the id must be unused
    pub fn add(&self, policy: SecurityPolicy) -> PolicyResult<()> {
        let compiled = Arc::new(CompiledPolicy::compile(policy)?);
        self.mutate(|current| {
            if current.contains_key(&compiled.source.id) {
                return Err(PolicyError::DuplicatePolicy(compiled.source.id.clone()));
            }
            current.insert(compiled.source.id.clone(), compiled.clone());
            Ok(())
        })
    }

    /// Replace an existing policy
    pub fn update(&self, policy: SecurityPolicy) -> PolicyResult<()> {
        let compiled = Arc::new(CompiledPolicy::compile(policy)?);
        self.mutate(|current| match current.get_mut(&compiled.source.id) {
            Some(slot) => {
                *slot = compiled.clone();
                Ok(())
            }
            None => Err(PolicyError::PolicyNotFound(compiled.source.id.clone())),
        })
    }

    /// Remove a policy, returning it
    pub fn remove(&self, policy_id: &str) -> PolicyResult<SecurityPolicy> {
        let mut removed = None;
        self.mutate(|current| match current.remove(policy_id) {
            Some(p) => {
                removed = Some(p.source.clone());
                Ok(())
            }
            None => Err(PolicyError::PolicyNotFound(policy_id.to_string())),
        })?;
        removed.ok_or_else(|| PolicyError::PolicyNotFound(policy_id.to_string()))
    }

    /// Look up a policy by id
    pub fn get(&self, policy_id: &str) -> Option<SecurityPolicy> {
        self.snapshot.load().by_id.get(policy_id).map(|p| p.source.clone())
    }

    /// All policies in evaluation order
    pub fn list(&self) -> Vec<SecurityPolicy> {
        self.snapshot.load().iter().map(|p| p.source.clone()).collect()
    }

    /// Atomically replace every policy
    pub fn replace_all(&self, policies: Vec<SecurityPolicy>) -> PolicyResult<()> {
        let mut compiled = HashMap::with_capacity(policies.len());
        for policy in policies {
            let policy = Arc::new(CompiledPolicy::compile(policy)?);
            if compiled.insert(policy.source.id.clone(), policy.clone()).is_some() {
                return Err(PolicyError::DuplicatePolicy(policy.source.id.clone()));
            }
        }
        self.mutate(|current| {
            *current = compiled;
            Ok(())
        })
    }

    fn mutate<F>(&self, f: F) -> PolicyResult<()>
    where
        F: FnOnce(&mut HashMap<String, Arc<CompiledPolicy>>) -> PolicyResult<()>,
    {
        let _guard = self.writer.lock();
        let mut current = self.snapshot.load().by_id.clone();
        f(&mut current)?;
        self.snapshot.store(Arc::new(PolicySet::from_policies(current.into_values())));
        self.version.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
