//! PCC/ADC Rule and Rule Catalog
//!
//! A `Rule` is the immutable descriptor of one policy/charging rule. The
//! `RuleCatalog` owns every provisioned rule, keyed by rule name, and is
//! rebuilt wholesale from an external `RuleSource`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{PolicyResult, StoreError};

/// Feature-mask bit: rule may be installed on the Gx reference point
pub const FEATURE_GX: u64 = 1 << 0;
/// Feature-mask bit: rule may be installed on the Sd reference point
pub const FEATURE_SD: u64 = 1 << 1;
/// Feature-mask bit: rule may be installed on the St reference point
pub const FEATURE_ST: u64 = 1 << 2;

/// One policy/charging rule.
///
/// Identity is the rule name, unique within a catalog. Attributes are set
/// once at load time; the engine never mutates a rule afterwards, so rules
/// are shared as `Arc<Rule>` by every rule set and timer that references
/// them.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// Rule name (identity, non-empty)
    pub name: String,
    /// Base name used for grouping related rules
    pub base_name: String,
    /// Rule type tag
    pub rule_type: String,
    /// Opaque rule definition payload, not interpreted by the engine
    pub definition: String,
    /// Time-of-day expression, e.g. "08:00-17:00,20:00-22:00" (empty = none)
    pub time_of_day: String,
    /// Usage-monitoring descriptor
    pub usage_monitoring: String,
    /// Whether the rule requires an online-charging (Sy) association
    pub sy_required: bool,
    /// Hour-of-day eligibility bitmask; 0 means always eligible
    pub time_mask: u64,
    /// Bitmask of reference points the rule may be installed on
    pub feature_mask: u64,
}

impl Rule {
    /// Create a rule with the given name and all other attributes defaulted
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Whether the rule's activation is time-gated
    pub fn time_sensitive(&self) -> bool {
        self.time_mask != 0 || !self.time_of_day.is_empty()
    }
}

/// External rule store contract.
///
/// `load_all_rules` returns the complete provisioned rule set or fails as a
/// whole; partial results are never surfaced.
pub trait RuleSource: Send + Sync {
    /// Fetch every provisioned rule from the store
    fn load_all_rules(&self) -> Result<Vec<Rule>, StoreError>;
}

/// In-memory rule source, used in tests and standalone deployments
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    rules: Vec<Rule>,
}

impl MemoryRuleSource {
    /// Create a source holding the given rules
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl RuleSource for MemoryRuleSource {
    fn load_all_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.rules.clone())
    }
}

/// Catalog of all provisioned rules, keyed by rule name.
///
/// Reload is atomic: the new catalog replaces the old one in a single swap,
/// and any failure leaves the previous contents intact.
#[derive(Debug, Default)]
pub struct RuleCatalog {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
}

impl RuleCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire catalog from the external rule source.
    ///
    /// Returns the number of rules loaded. On any failure the previous
    /// catalog contents are retained unchanged.
    pub fn load(&self, source: &dyn RuleSource) -> PolicyResult<usize> {
        let loaded = source.load_all_rules()?;

        let mut map = HashMap::with_capacity(loaded.len());
        for rule in loaded {
            if rule.name.is_empty() {
                return Err(StoreError::InvalidRule("rule with empty name".to_string()).into());
            }
            if map.insert(rule.name.clone(), Arc::new(rule)).is_some() {
                log::warn!("Duplicate rule name in store, keeping the later row");
            }
        }

        let count = map.len();
        let mut rules = self
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *rules = map;
        drop(rules);

        log::info!("Rule catalog loaded ({count} rules)");
        Ok(count)
    }

    /// Look up a rule by name. Absence is not an error.
    pub fn lookup(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.read().ok()?.get(name).cloned()
    }

    /// Number of rules in the catalog
    pub fn len(&self) -> usize {
        self.rules.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
