//! Shared Rule Timers
//!
//! One periodic activation re-check per time-gated rule, shared by every
//! session that references the rule. The registry owns each timer's full
//! lifecycle: lazily created on first reference, evicted when the last
//! dependent session detaches, never more than one timer per rule name.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::PolicyResult;
use crate::evaluator::{interfaces_for, DeltaSink};
use crate::rule::Rule;
use crate::rule_set::{RuleSet, SessionId};
use crate::scheduler::TimerScheduler;
use crate::time_gate::{eligible_now, Clock};

/// Mutable timer state, guarded by the per-timer lock
#[derive(Debug)]
struct TimerInner {
    sessions: BTreeSet<SessionId>,
    active: bool,
    pending_interval: Option<Duration>,
}

/// Periodic activation re-check for one time-gated rule.
///
/// Many sessions share a single timer. The dependent-session set and the
/// state-flip delivery are guarded by a lock scoped to this timer alone,
/// so contention stays among sessions sharing one rule.
pub struct RuleTimer {
    rule: Arc<Rule>,
    timer_id: u64,
    inner: Mutex<TimerInner>,
}

impl RuleTimer {
    fn new(rule: Arc<Rule>, timer_id: u64, initially_active: bool) -> Self {
        Self {
            rule,
            timer_id,
            inner: Mutex::new(TimerInner {
                sessions: BTreeSet::new(),
                active: initially_active,
                pending_interval: None,
            }),
        }
    }

    /// The rule this timer is bound to
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// Name of the bound rule
    pub fn rule_name(&self) -> &str {
        &self.rule.name
    }

    /// Opaque scheduling handle
    pub fn timer_id(&self) -> u64 {
        self.timer_id
    }

    /// Recorded activation state as of the last tick
    pub fn is_active(&self) -> bool {
        self.inner.lock().map(|i| i.active).unwrap_or(false)
    }

    /// Attach a dependent session. Returns whether it was newly added.
    pub fn attach_session(&self, session: &SessionId) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => inner.sessions.insert(session.clone()),
            Err(_) => false,
        }
    }

    /// Detach a dependent session; no-op if absent
    pub fn detach_session(&self, session: &SessionId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sessions.remove(session);
        }
    }

    /// Number of currently attached sessions
    pub fn session_count(&self) -> usize {
        self.inner.lock().map(|i| i.sessions.len()).unwrap_or(0)
    }

    /// Record a new polling interval, effective from the next arming
    pub fn set_next_interval(&self, interval: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_interval = Some(interval);
        }
    }

    /// Take the pending interval, if one was recorded since the last tick
    pub fn take_pending_interval(&self) -> Option<Duration> {
        self.inner.lock().ok()?.pending_interval.take()
    }

    /// Re-evaluate the rule's time-based eligibility and, on a state flip,
    /// deliver a single-rule install or remove delta to every attached
    /// session on the interfaces the rule's feature mask allows. No delta
    /// is delivered when the state is unchanged.
    pub fn process_interval_expiration(&self, clock: &dyn Clock, sink: &dyn DeltaSink) {
        let eligible = eligible_now(&self.rule, clock.now());

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.active == eligible {
            return;
        }
        inner.active = eligible;

        log::info!(
            "Rule {} is now {}, notifying {} session(s)",
            self.rule.name,
            if eligible { "active" } else { "inactive" },
            inner.sessions.len()
        );

        let mut flipped = RuleSet::new();
        flipped.insert(Arc::clone(&self.rule));
        let empty = RuleSet::new();
        let (install, remove) = if eligible {
            (&flipped, &empty)
        } else {
            (&empty, &flipped)
        };

        for session in &inner.sessions {
            for interface in interfaces_for(&self.rule) {
                sink.deliver(session, interface, install, remove);
            }
        }
    }
}

impl std::fmt::Debug for RuleTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTimer")
            .field("rule", &self.rule.name)
            .field("timer_id", &self.timer_id)
            .field("sessions", &self.session_count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Registry of all live rule timers, keyed by rule name.
///
/// Sole owner of timer lifecycle: `get_or_create` is the only constructor
/// path and `release` the only eviction path, so at most one timer ever
/// exists per rule name, identically visible to all callers.
pub struct RuleTimerRegistry {
    timers: RwLock<HashMap<String, Arc<RuleTimer>>>,
    scheduler: Arc<dyn TimerScheduler>,
    clock: Arc<dyn Clock>,
    default_interval: Duration,
}

impl RuleTimerRegistry {
    /// Create a registry driving timers through the given scheduler and clock
    pub fn new(
        scheduler: Arc<dyn TimerScheduler>,
        clock: Arc<dyn Clock>,
        default_interval: Duration,
    ) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            scheduler,
            clock,
            default_interval,
        }
    }

    /// Return the rule's timer, constructing and arming it on first use.
    ///
    /// Fast unlocked lookup first; on apparent absence the existence check
    /// is repeated under the write lock, so concurrent callers racing on
    /// one rule name all observe the identical timer instance. A scheduler
    /// arming failure is returned to the caller and leaves every other
    /// timer untouched.
    pub fn get_or_create(&self, rule: &Arc<Rule>) -> PolicyResult<Arc<RuleTimer>> {
        if let Ok(timers) = self.timers.read() {
            if let Some(timer) = timers.get(&rule.name) {
                return Ok(Arc::clone(timer));
            }
        }

        let mut timers = self
            .timers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = timers.get(&rule.name) {
            return Ok(Arc::clone(timer));
        }
        self.create_locked(&mut timers, rule)
    }

    /// Like `get_or_create`, but attaches the session before the registry
    /// lock is dropped. Eviction takes the write lock, so the returned
    /// timer is guaranteed to still be the registered one at the moment
    /// the session is attached; an attach after an unlocked lookup could
    /// land on a timer a concurrent `release` just evicted.
    pub fn get_or_create_and_attach(
        &self,
        rule: &Arc<Rule>,
        session: &SessionId,
    ) -> PolicyResult<Arc<RuleTimer>> {
        if let Ok(timers) = self.timers.read() {
            if let Some(timer) = timers.get(&rule.name) {
                // Holding the read lock blocks eviction during the attach
                timer.attach_session(session);
                return Ok(Arc::clone(timer));
            }
        }

        let mut timers = self
            .timers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let timer = match timers.get(&rule.name) {
            Some(timer) => Arc::clone(timer),
            None => self.create_locked(&mut timers, rule)?,
        };
        timer.attach_session(session);
        Ok(timer)
    }

    fn create_locked(
        &self,
        timers: &mut HashMap<String, Arc<RuleTimer>>,
        rule: &Arc<Rule>,
    ) -> PolicyResult<Arc<RuleTimer>> {
        let timer_id = self.scheduler.arm(&rule.name, self.default_interval)?;
        let initially_active = eligible_now(rule, self.clock.now());
        let timer = Arc::new(RuleTimer::new(Arc::clone(rule), timer_id, initially_active));
        timers.insert(rule.name.clone(), Arc::clone(&timer));

        log::debug!(
            "Rule timer created: rule={} timer_id={timer_id} active={initially_active}",
            rule.name
        );
        Ok(timer)
    }

    /// Lookup without side effects
    pub fn find(&self, name: &str) -> Option<Arc<RuleTimer>> {
        self.timers.read().ok()?.get(name).cloned()
    }

    /// Detach a session from the rule's timer; when the dependent-session
    /// count reaches zero the timer is evicted and its scheduler entry
    /// cancelled.
    pub fn release(&self, rule_name: &str, session: &SessionId) {
        let Ok(mut timers) = self.timers.write() else {
            return;
        };
        let Some(timer) = timers.get(rule_name) else {
            return;
        };

        timer.detach_session(session);
        if timer.session_count() == 0 {
            let timer_id = timer.timer_id();
            timers.remove(rule_name);
            self.scheduler.cancel(timer_id);
            log::debug!("Rule timer evicted: rule={rule_name} timer_id={timer_id}");
        }
    }

    /// Run one expiration for the named rule's timer, then apply any
    /// pending interval change for its next arming.
    pub fn tick(&self, rule_name: &str, sink: &dyn DeltaSink) {
        let Some(timer) = self.find(rule_name) else {
            return;
        };

        timer.process_interval_expiration(self.clock.as_ref(), sink);

        if let Some(interval) = timer.take_pending_interval() {
            if let Err(e) = self.scheduler.rearm(timer.timer_id(), interval) {
                log::warn!("Failed to apply new interval for rule {rule_name}: {e}");
            }
        }
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.timers.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Whether no timers are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain and destroy all timers, cancelling their scheduler entries
    pub fn shutdown(&self) {
        let Ok(mut timers) = self.timers.write() else {
            return;
        };
        for (name, timer) in timers.drain() {
            self.scheduler.cancel(timer.timer_id());
            log::debug!("Rule timer drained: rule={name}");
        }
    }
}

impl std::fmt::Debug for RuleTimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTimerRegistry")
            .field("timers", &self.len())
            .field("default_interval", &self.default_interval)
            .finish()
    }
}
