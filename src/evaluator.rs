//! Rule Evaluation
//!
//! Computes, from a session's active and desired rule sets, the install and
//! remove deltas for each of the three downstream reference points:
//! - Gx: traffic-enforcement point
//! - Sd: traffic-detection function
//! - St: online-charging function
//!
//! The evaluator is stateless and never mutates its inputs; the caller
//! commits the new active set only after the deltas have been dispatched.

use std::sync::Arc;

use crate::error::{PolicyError, PolicyResult};
use crate::rule::{Rule, FEATURE_GX, FEATURE_SD, FEATURE_ST};
use crate::rule_set::{RuleSet, SessionId};

/// Downstream signaling reference point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Gx, toward the traffic-enforcement point
    Gx,
    /// Sd, toward the traffic-detection function
    Sd,
    /// St, toward the online-charging function
    St,
}

impl Interface {
    /// Interface name as string
    pub fn name(&self) -> &'static str {
        match self {
            Interface::Gx => "Gx",
            Interface::Sd => "Sd",
            Interface::St => "St",
        }
    }
}

/// Reference points a rule is eligible for, in Gx/Sd/St order.
///
/// A rule requiring an online-charging association is always eligible for
/// St, independent of its feature mask.
pub fn interfaces_for(rule: &Rule) -> Vec<Interface> {
    let mut interfaces = Vec::with_capacity(3);
    if rule.feature_mask & FEATURE_GX != 0 {
        interfaces.push(Interface::Gx);
    }
    if rule.feature_mask & FEATURE_SD != 0 {
        interfaces.push(Interface::Sd);
    }
    if rule.feature_mask & FEATURE_ST != 0 || rule.sy_required {
        interfaces.push(Interface::St);
    }
    interfaces
}

/// Outbound delta sink, implemented by the signaling layer.
///
/// Receives ordered, duplicate-free install/remove batches per session and
/// reference point. Delivery and retry are the sink's concern.
pub trait DeltaSink: Send + Sync {
    /// Deliver an install/remove pair for one session on one interface
    fn deliver(&self, session: &SessionId, interface: Interface, install: &RuleSet, remove: &RuleSet);
}

/// Result of one rule evaluation: per-interface install and remove batches
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluation {
    /// Rules to install on Gx
    pub gx_install: RuleSet,
    /// Rules to remove on Gx
    pub gx_remove: RuleSet,
    /// Rules to install on Sd
    pub sd_install: RuleSet,
    /// Rules to remove on Sd
    pub sd_remove: RuleSet,
    /// Rules to install on St
    pub st_install: RuleSet,
    /// Rules to remove on St
    pub st_remove: RuleSet,
}

impl RuleEvaluation {
    /// Whether all six batches are empty
    pub fn is_empty(&self) -> bool {
        self.gx_install.is_empty()
            && self.gx_remove.is_empty()
            && self.sd_install.is_empty()
            && self.sd_remove.is_empty()
            && self.st_install.is_empty()
            && self.st_remove.is_empty()
    }

    fn install_set(&mut self, interface: Interface) -> &mut RuleSet {
        match interface {
            Interface::Gx => &mut self.gx_install,
            Interface::Sd => &mut self.sd_install,
            Interface::St => &mut self.st_install,
        }
    }

    fn remove_set(&mut self, interface: Interface) -> &mut RuleSet {
        match interface {
            Interface::Gx => &mut self.gx_remove,
            Interface::Sd => &mut self.sd_remove,
            Interface::St => &mut self.st_remove,
        }
    }

    /// Install/remove pair for one interface
    pub fn for_interface(&self, interface: Interface) -> (&RuleSet, &RuleSet) {
        match interface {
            Interface::Gx => (&self.gx_install, &self.gx_remove),
            Interface::Sd => (&self.sd_install, &self.sd_remove),
            Interface::St => (&self.st_install, &self.st_remove),
        }
    }

    /// Forward every non-empty per-interface pair to the delta sink
    pub fn dispatch(&self, session: &SessionId, sink: &dyn DeltaSink) {
        for interface in [Interface::Gx, Interface::Sd, Interface::St] {
            let (install, remove) = self.for_interface(interface);
            if !install.is_empty() || !remove.is_empty() {
                log::debug!(
                    "Dispatching deltas: session={session} interface={} install={} remove={}",
                    interface.name(),
                    install.len(),
                    remove.len()
                );
                sink.deliver(session, interface, install, remove);
            }
        }
    }
}

/// Stateless rule-evaluation algorithm
#[derive(Debug, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }

    /// Compute per-interface install/remove deltas.
    ///
    /// Install candidates are `desired − active` (in desired order), remove
    /// candidates `active − desired` (in active order), both by rule name.
    /// Each candidate is classified onto the interfaces its feature mask
    /// allows. An install candidate eligible for no interface either fails
    /// the entire evaluation (`fail_on_uninstallable = true`, all-or-nothing,
    /// no partial deltas) or is skipped. Removal is always best-effort.
    pub fn evaluate(
        &self,
        active: &RuleSet,
        desired: &RuleSet,
        fail_on_uninstallable: bool,
    ) -> PolicyResult<RuleEvaluation> {
        let to_install = desired.difference(active);
        let to_remove = active.difference(desired);

        let mut result = RuleEvaluation::default();

        for rule in &to_install {
            let interfaces = interfaces_for(rule);
            if interfaces.is_empty() {
                if fail_on_uninstallable {
                    log::warn!(
                        "Rule {} has no eligible interface, aborting evaluation",
                        rule.name
                    );
                    return Err(PolicyError::UninstallableRule {
                        rule: rule.name.clone(),
                    });
                }
                log::debug!("Rule {} has no eligible interface, skipping", rule.name);
                continue;
            }
            for interface in interfaces {
                result.install_set(interface).insert(Arc::clone(rule));
            }
        }

        for rule in &to_remove {
            // Removal is best-effort; a rule with no eligible interface is
            // simply not signaled anywhere.
            for interface in interfaces_for(rule) {
                result.remove_set(interface).insert(Arc::clone(rule));
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn rule(name: &str, feature_mask: u64) -> Arc<Rule> {
        Arc::new(Rule {
            feature_mask,
            ..Rule::new(name)
        })
    }

    fn sy_rule(name: &str, feature_mask: u64) -> Arc<Rule> {
        Arc::new(Rule {
            feature_mask,
            sy_required: true,
            ..Rule::new(name)
        })
    }

    /// Sink that records every delivered delta
    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<(SessionId, Interface, Vec<String>, Vec<String>)>>,
    }

    impl DeltaSink for RecordingSink {
        fn deliver(
            &self,
            session: &SessionId,
            interface: Interface,
            install: &RuleSet,
            remove: &RuleSet,
        ) {
            self.deliveries.lock().unwrap().push((
                session.clone(),
                interface,
                install.names().iter().map(|s| s.to_string()).collect(),
                remove.names().iter().map(|s| s.to_string()).collect(),
            ));
        }
    }

    #[test]
    fn test_install_on_gx_and_sd() {
        // R1 with feature mask {Gx, Sd}, active empty
        let evaluator = RuleEvaluator::new();
        let active = RuleSet::new();
        let desired = RuleSet::from_rules(vec![rule("R1", FEATURE_GX | FEATURE_SD)]);

        let result = evaluator.evaluate(&active, &desired, false).unwrap();
        assert_eq!(result.gx_install.names(), vec!["R1"]);
        assert_eq!(result.sd_install.names(), vec!["R1"]);
        assert!(result.st_install.is_empty());
        assert!(result.gx_remove.is_empty());
        assert!(result.sd_remove.is_empty());
        assert!(result.st_remove.is_empty());
    }

    #[test]
    fn test_identical_sets_yield_empty_result() {
        let evaluator = RuleEvaluator::new();
        let set = RuleSet::from_rules(vec![rule("a", FEATURE_GX), rule("b", FEATURE_SD)]);

        let result = evaluator.evaluate(&set, &set, true).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_empty_desired_is_full_teardown() {
        let evaluator = RuleEvaluator::new();
        let active = RuleSet::from_rules(vec![
            rule("a", FEATURE_GX),
            rule("b", FEATURE_GX | FEATURE_SD | FEATURE_ST),
        ]);

        let result = evaluator.evaluate(&active, &RuleSet::new(), true).unwrap();
        assert_eq!(result.gx_remove.names(), vec!["a", "b"]);
        assert_eq!(result.sd_remove.names(), vec!["b"]);
        assert_eq!(result.st_remove.names(), vec!["b"]);
        assert!(result.gx_install.is_empty());
    }

    #[test]
    fn test_sy_required_forces_st_install() {
        let evaluator = RuleEvaluator::new();
        let desired = RuleSet::from_rules(vec![sy_rule("chg", FEATURE_GX)]);

        let result = evaluator.evaluate(&RuleSet::new(), &desired, true).unwrap();
        assert_eq!(result.gx_install.names(), vec!["chg"]);
        assert_eq!(result.st_install.names(), vec!["chg"]);
        assert!(result.sd_install.is_empty());
    }

    #[test]
    fn test_uninstallable_rule_fails_atomically() {
        // R2 with no feature bits alongside an otherwise valid rule
        let evaluator = RuleEvaluator::new();
        let desired = RuleSet::from_rules(vec![rule("ok", FEATURE_GX), rule("R2", 0)]);

        let err = evaluator.evaluate(&RuleSet::new(), &desired, true);
        assert!(matches!(
            err,
            Err(PolicyError::UninstallableRule { ref rule }) if rule == "R2"
        ));
    }

    #[test]
    fn test_uninstallable_rule_skipped_in_lenient_mode() {
        let evaluator = RuleEvaluator::new();
        let desired = RuleSet::from_rules(vec![rule("R2", 0), rule("ok", FEATURE_GX)]);

        let result = evaluator.evaluate(&RuleSet::new(), &desired, false).unwrap();
        assert_eq!(result.gx_install.names(), vec!["ok"]);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_uninstallable_removal_is_best_effort() {
        // A rule with no interfaces in the remove path is never an error,
        // even in strict mode
        let evaluator = RuleEvaluator::new();
        let active = RuleSet::from_rules(vec![rule("dead", 0), rule("live", FEATURE_GX)]);
        let desired = RuleSet::from_rules(vec![rule("live", FEATURE_GX)]);

        let result = evaluator.evaluate(&active, &desired, true).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_install_order_follows_desired() {
        let evaluator = RuleEvaluator::new();
        let active = RuleSet::from_rules(vec![rule("x", FEATURE_GX)]);
        let desired = RuleSet::from_rules(vec![
            rule("c", FEATURE_GX),
            rule("x", FEATURE_GX),
            rule("a", FEATURE_GX),
            rule("b", FEATURE_GX),
        ]);

        let result = evaluator.evaluate(&active, &desired, true).unwrap();
        assert_eq!(result.gx_install.names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let evaluator = RuleEvaluator::new();
        let active = RuleSet::from_rules(vec![rule("a", FEATURE_GX)]);
        let desired = RuleSet::from_rules(vec![rule("b", FEATURE_GX)]);

        evaluator.evaluate(&active, &desired, true).unwrap();
        assert_eq!(active.names(), vec!["a"]);
        assert_eq!(desired.names(), vec!["b"]);
    }

    #[test]
    fn test_dispatch_skips_empty_interfaces() {
        let evaluator = RuleEvaluator::new();
        let desired = RuleSet::from_rules(vec![rule("R1", FEATURE_GX | FEATURE_SD)]);
        let result = evaluator.evaluate(&RuleSet::new(), &desired, true).unwrap();

        let sink = RecordingSink::default();
        let session = SessionId::new("gx-1");
        result.dispatch(&session, &sink);

        let deliveries = sink.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].1, Interface::Gx);
        assert_eq!(deliveries[1].1, Interface::Sd);
        assert_eq!(deliveries[0].2, vec!["R1"]);
        assert!(deliveries[0].3.is_empty());
    }
}
