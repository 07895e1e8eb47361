//! Ordered Rule Sets
//!
//! A `RuleSet` is an ordered, duplicate-free collection of rule references.
//! It serves both as "rules applicable to a session" and as an
//! install/remove batch, and it carries the list of dependent sessions used
//! for rule-timer fan-out.

use std::fmt;
use std::sync::Arc;

use crate::rule::Rule;

/// Gx Session-Id, the session identity used throughout the core
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id
    pub fn new(sid: &str) -> Self {
        Self(sid.to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(sid: &str) -> Self {
        Self::new(sid)
    }
}

/// Ordered, duplicate-free collection of rule references.
///
/// Rule identity is the rule name. Insertion order is preserved across
/// removals, and a push of an already present rule is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<Rule>>,
    sessions: Vec<SessionId>,
}

impl RuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule set from rules, dropping duplicates by name
    pub fn from_rules<I: IntoIterator<Item = Arc<Rule>>>(rules: I) -> Self {
        let mut set = Self::new();
        for rule in rules {
            set.insert(rule);
        }
        set
    }

    /// Append a rule; no-op if a rule with the same name is already present
    pub fn insert(&mut self, rule: Arc<Rule>) {
        if !self.contains(&rule) {
            self.rules.push(rule);
        }
    }

    /// Whether a rule with the same name is present
    pub fn contains(&self, rule: &Rule) -> bool {
        self.contains_name(&rule.name)
    }

    /// Whether a rule with the given name is present
    pub fn contains_name(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name == name)
    }

    /// Remove a rule by identity. Returns whether a removal occurred;
    /// the remaining elements keep their relative order.
    pub fn remove(&mut self, rule: &Rule) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != rule.name);
        self.rules.len() != before
    }

    /// Rules in this set minus rules present in `other`, in this set's order
    pub fn difference(&self, other: &RuleSet) -> RuleSet {
        let mut result = RuleSet::new();
        for rule in &self.rules {
            if !other.contains_name(&rule.name) {
                result.insert(Arc::clone(rule));
            }
        }
        result
    }

    /// Iterate over the contained rules in order
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Rule>> {
        self.rules.iter()
    }

    /// Rule names in order
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Number of rules in the set
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Drop all rules (dependent sessions are kept)
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    // ========== Dependent-session tracking ==========

    /// Attach a dependent session (idempotent)
    pub fn attach_session(&mut self, session: &SessionId) {
        if !self.sessions.contains(session) {
            self.sessions.push(session.clone());
        }
    }

    /// Detach a dependent session; no-op if absent
    pub fn detach_session(&mut self, session: &SessionId) {
        self.sessions.retain(|s| s != session);
    }

    /// Dependent sessions attached to this set
    pub fn sessions(&self) -> &[SessionId] {
        &self.sessions
    }
}

impl PartialEq for RuleSet {
    /// Two rule sets are equal when they hold the same rules in the same
    /// order; dependent-session tracking does not take part in equality.
    fn eq(&self, other: &Self) -> bool {
        self.rules.len() == other.rules.len()
            && self
                .rules
                .iter()
                .zip(other.rules.iter())
                .all(|(a, b)| a.name == b.name)
    }
}

impl Eq for RuleSet {}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Arc<Rule>;
    type IntoIter = std::slice::Iter<'a, Arc<Rule>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
