//! Policy Context
//!
//! Top-level object tying the policy-decision core together: rule catalog,
//! rule-timer registry, scheduler, clock and configuration. Explicitly
//! constructed and shut down by the hosting session layer; there is no
//! hidden global instance, which keeps tests isolated.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::PolicyConfig;
use crate::error::{PolicyError, PolicyResult};
use crate::evaluator::{DeltaSink, RuleEvaluation, RuleEvaluator};
use crate::rule::{Rule, RuleCatalog, RuleSource};
use crate::rule_set::{RuleSet, SessionId};
use crate::scheduler::{PollScheduler, TimerScheduler};
use crate::time_gate::{Clock, SystemClock};
use crate::timer::RuleTimerRegistry;

/// Policy-decision core context
pub struct PolicyContext {
    config: PolicyConfig,
    catalog: RuleCatalog,
    registry: RuleTimerRegistry,
    scheduler: Arc<PollScheduler>,
    evaluator: RuleEvaluator,
    sessions: RwLock<HashSet<SessionId>>,
    initialized: AtomicBool,
}

impl PolicyContext {
    /// Create a context driven by the wall clock
    pub fn new(config: PolicyConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a context with an injected clock (tests, replay)
    pub fn with_clock(config: PolicyConfig, clock: Arc<dyn Clock>) -> Self {
        let scheduler = Arc::new(PollScheduler::new());
        let registry = RuleTimerRegistry::new(
            Arc::clone(&scheduler) as Arc<dyn TimerScheduler>,
            clock,
            config.timer_interval(),
        );
        Self {
            config,
            catalog: RuleCatalog::new(),
            registry,
            scheduler,
            evaluator: RuleEvaluator::new(),
            sessions: RwLock::new(HashSet::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the context
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!(
            "Policy context initialized (rule_timers={}, interval={}s)",
            self.config.enable_rule_timers,
            self.config.timer_interval_secs
        );
    }

    /// Finalize the context, draining all rule timers
    pub fn fini(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        self.registry.shutdown();
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.clear();
        }
        log::info!("Policy context finalized");
    }

    /// Whether the context is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Active configuration
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// The rule catalog
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// The rule-timer registry
    pub fn registry(&self) -> &RuleTimerRegistry {
        &self.registry
    }

    /// The timer scheduler driving rule-timer expirations
    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    /// Reload the rule catalog from the external store.
    ///
    /// Returns the number of rules loaded; on failure the previous catalog
    /// stays intact.
    pub fn reload_rules(&self, source: &dyn RuleSource) -> PolicyResult<usize> {
        self.catalog.load(source)
    }

    /// Resolve an ordered list of provisioned rule names into a rule set.
    ///
    /// Names missing from the catalog are skipped with a warning; order and
    /// de-duplication follow `RuleSet` semantics.
    pub fn resolve_rules(&self, names: &[&str]) -> RuleSet {
        let mut set = RuleSet::new();
        for name in names {
            match self.catalog.lookup(name) {
                Some(rule) => set.insert(rule),
                None => log::warn!("Provisioned rule {name} not found in catalog"),
            }
        }
        set
    }

    /// Evaluate a session's desired rules against its active rules.
    ///
    /// Dispatches the resulting per-interface deltas to the sink, then
    /// attaches the session to the shared timer of every time-gated rule
    /// being installed and releases it from every time-gated rule being
    /// removed. The caller commits the new active set after this returns
    /// successfully.
    pub fn evaluate_session(
        &self,
        session: &SessionId,
        active: &RuleSet,
        desired: &RuleSet,
        sink: &dyn DeltaSink,
    ) -> PolicyResult<RuleEvaluation> {
        if !self.is_initialized() {
            return Err(PolicyError::NotInitialized);
        }
        let newly_admitted = self.admit_session(session)?;

        let result = match self
            .evaluator
            .evaluate(active, desired, self.config.fail_on_uninstallable_rule)
        {
            Ok(result) => result,
            Err(e) => {
                // All-or-nothing failure: a session admitted just for this
                // evaluation must not keep occupying a cap slot
                if newly_admitted {
                    self.forget_session(session);
                }
                return Err(e);
            }
        };

        result.dispatch(session, sink);

        if self.config.enable_rule_timers {
            self.bind_session_timers(session, &result)?;
        }

        Ok(result)
    }

    /// Release every time-gated rule a session holds; called at session
    /// termination so shared timers can be evicted once unused.
    pub fn release_session(&self, session: &SessionId, active: &RuleSet) {
        for rule in active {
            if rule.time_sensitive() {
                self.registry.release(&rule.name, session);
            }
        }
        if let Ok(mut sessions) = self.sessions.write() {
            if sessions.remove(session) {
                log::debug!("Session released: {session}");
            }
        }
    }

    /// Number of currently tracked sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Run every due rule-timer expiration. Returns the number of ticks
    /// processed. The hosting layer calls this from its drive loop, sleeping
    /// for `scheduler().next_expiration()` between rounds.
    pub fn process_expired_timers(&self, sink: &dyn DeltaSink) -> usize {
        let ticks = self.scheduler.process_expired();
        let count = ticks.len();
        for tick in ticks {
            self.registry.tick(&tick.rule_name, sink);
        }
        count
    }

    /// Track the session, rejecting a new one past the configured cap.
    /// Re-evaluation of an already tracked session always passes. Returns
    /// whether the session was newly admitted.
    fn admit_session(&self, session: &SessionId) -> PolicyResult<bool> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sessions.contains(session) {
            return Ok(false);
        }
        if sessions.len() >= self.config.max_sessions {
            log::warn!(
                "Rejecting session {session}: cap of {} reached",
                self.config.max_sessions
            );
            return Err(PolicyError::MaxSessionsExceeded {
                max: self.config.max_sessions,
            });
        }
        sessions.insert(session.clone());
        Ok(true)
    }

    fn forget_session(&self, session: &SessionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(session);
        }
    }

    fn bind_session_timers(
        &self,
        session: &SessionId,
        result: &RuleEvaluation,
    ) -> PolicyResult<()> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for rule in install_rules(result) {
            if rule.time_sensitive() && seen.insert(&rule.name) {
                self.registry.get_or_create_and_attach(rule, session)?;
            }
        }

        seen.clear();
        for rule in remove_rules(result) {
            if rule.time_sensitive() && seen.insert(&rule.name) {
                self.registry.release(&rule.name, session);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyContext")
            .field("initialized", &self.is_initialized())
            .field("rules", &self.catalog.len())
            .field("sessions", &self.session_count())
            .field("timers", &self.registry.len())
            .finish()
    }
}

fn install_rules(result: &RuleEvaluation) -> impl Iterator<Item = &Arc<Rule>> {
    result
        .gx_install
        .iter()
        .chain(result.sd_install.iter())
        .chain(result.st_install.iter())
}

fn remove_rules(result: &RuleEvaluation) -> impl Iterator<Item = &Arc<Rule>> {
    result
        .gx_remove
        .iter()
        .chain(result.sd_remove.iter())
        .chain(result.st_remove.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Interface;
    use crate::rule::{MemoryRuleSource, FEATURE_GX, FEATURE_SD};
    use crate::time_gate::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn clock_at(hour: u32) -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 8, 25, hour, 0, 0).unwrap(),
        ))
    }

    fn test_context(hour: u32) -> (PolicyContext, Arc<FixedClock>) {
        let clock = clock_at(hour);
        let ctx = PolicyContext::with_clock(
            PolicyConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        ctx.init();
        (ctx, clock)
    }

    #[derive(Default)]
    struct CountingSink {
        deliveries: Mutex<Vec<(SessionId, Interface)>>,
    }

    impl DeltaSink for CountingSink {
        fn deliver(
            &self,
            session: &SessionId,
            interface: Interface,
            _install: &RuleSet,
            _remove: &RuleSet,
        ) {
            self.deliveries
                .lock()
                .unwrap()
                .push((session.clone(), interface));
        }
    }

    fn source() -> MemoryRuleSource {
        MemoryRuleSource::new(vec![
            Rule {
                feature_mask: FEATURE_GX | FEATURE_SD,
                ..Rule::new("plain")
            },
            Rule {
                feature_mask: FEATURE_GX,
                time_of_day: "08:00-17:00".to_string(),
                ..Rule::new("office-hours")
            },
        ])
    }

    #[test]
    fn test_init_fini_lifecycle() {
        let (ctx, _clock) = test_context(12);
        assert!(ctx.is_initialized());

        ctx.fini();
        assert!(!ctx.is_initialized());

        // Operations on a finalized context are rejected
        let sink = CountingSink::default();
        let err = ctx.evaluate_session(
            &SessionId::new("gx-1"),
            &RuleSet::new(),
            &RuleSet::new(),
            &sink,
        );
        assert!(matches!(err, Err(PolicyError::NotInitialized)));
    }

    #[test]
    fn test_resolve_skips_unknown_names() {
        let (ctx, _clock) = test_context(12);
        ctx.reload_rules(&source()).unwrap();

        let set = ctx.resolve_rules(&["plain", "missing", "office-hours", "plain"]);
        assert_eq!(set.names(), vec!["plain", "office-hours"]);
    }

    #[test]
    fn test_evaluate_session_attaches_time_gated_rules() {
        let (ctx, _clock) = test_context(12);
        ctx.reload_rules(&source()).unwrap();

        let session = SessionId::new("gx-1");
        let desired = ctx.resolve_rules(&["plain", "office-hours"]);
        let sink = CountingSink::default();

        let result = ctx
            .evaluate_session(&session, &RuleSet::new(), &desired, &sink)
            .unwrap();
        assert_eq!(result.gx_install.names(), vec!["plain", "office-hours"]);

        // Only the time-gated rule gets a shared timer
        assert_eq!(ctx.registry().len(), 1);
        let timer = ctx.registry().find("office-hours").unwrap();
        assert_eq!(timer.session_count(), 1);
        assert!(ctx.registry().find("plain").is_none());
    }

    #[test]
    fn test_rule_removal_releases_timer() {
        let (ctx, _clock) = test_context(12);
        ctx.reload_rules(&source()).unwrap();

        let session = SessionId::new("gx-1");
        let desired = ctx.resolve_rules(&["office-hours"]);
        let sink = CountingSink::default();

        ctx.evaluate_session(&session, &RuleSet::new(), &desired, &sink)
            .unwrap();
        assert_eq!(ctx.registry().len(), 1);

        // Shrink the desired set to nothing: the removal releases the timer
        ctx.evaluate_session(&session, &desired, &RuleSet::new(), &sink)
            .unwrap();
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn test_release_session_drops_all_timers() {
        let (ctx, _clock) = test_context(12);
        ctx.reload_rules(&source()).unwrap();

        let session = SessionId::new("gx-1");
        let desired = ctx.resolve_rules(&["plain", "office-hours"]);
        let sink = CountingSink::default();
        ctx.evaluate_session(&session, &RuleSet::new(), &desired, &sink)
            .unwrap();

        ctx.release_session(&session, &desired);
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn test_timers_disabled_by_config() {
        let clock = clock_at(12);
        let config = PolicyConfig {
            enable_rule_timers: false,
            ..PolicyConfig::default()
        };
        let ctx = PolicyContext::with_clock(config, clock as Arc<dyn Clock>);
        ctx.init();
        ctx.reload_rules(&source()).unwrap();

        let sink = CountingSink::default();
        let desired = ctx.resolve_rules(&["office-hours"]);
        ctx.evaluate_session(&SessionId::new("gx-1"), &RuleSet::new(), &desired, &sink)
            .unwrap();

        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn test_session_cap_is_enforced() {
        let clock = clock_at(12);
        let config = PolicyConfig {
            max_sessions: 2,
            ..PolicyConfig::default()
        };
        let ctx = PolicyContext::with_clock(config, clock as Arc<dyn Clock>);
        ctx.init();
        ctx.reload_rules(&source()).unwrap();

        let sink = CountingSink::default();
        let desired = ctx.resolve_rules(&["plain"]);
        let s1 = SessionId::new("gx-1");
        let s2 = SessionId::new("gx-2");
        let s3 = SessionId::new("gx-3");

        ctx.evaluate_session(&s1, &RuleSet::new(), &desired, &sink)
            .unwrap();
        ctx.evaluate_session(&s2, &RuleSet::new(), &desired, &sink)
            .unwrap();
        assert_eq!(ctx.session_count(), 2);

        // Third session is rejected at the cap
        let err = ctx.evaluate_session(&s3, &RuleSet::new(), &desired, &sink);
        assert!(matches!(
            err,
            Err(PolicyError::MaxSessionsExceeded { max: 2 })
        ));

        // Re-evaluation of a tracked session still passes at the cap
        ctx.evaluate_session(&s1, &desired, &desired, &sink)
            .unwrap();

        // Releasing a session frees room for the rejected one
        ctx.release_session(&s1, &desired);
        assert_eq!(ctx.session_count(), 1);
        ctx.evaluate_session(&s3, &RuleSet::new(), &desired, &sink)
            .unwrap();
    }

    #[test]
    fn test_process_expired_timers_with_nothing_due() {
        let (ctx, _clock) = test_context(12);
        let sink = CountingSink::default();
        assert_eq!(ctx.process_expired_timers(&sink), 0);
    }

    #[test]
    fn test_fini_drains_timers() {
        let (ctx, _clock) = test_context(12);
        ctx.reload_rules(&source()).unwrap();

        let sink = CountingSink::default();
        let desired = ctx.resolve_rules(&["office-hours"]);
        ctx.evaluate_session(&SessionId::new("gx-1"), &RuleSet::new(), &desired, &sink)
            .unwrap();
        assert_eq!(ctx.registry().len(), 1);

        ctx.fini();
        assert!(ctx.registry().is_empty());
    }
}
