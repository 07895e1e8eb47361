//! Rule-Timer Scheduling
//!
//! Poll-based scheduler backing the rule-timer registry. The registry arms
//! one periodic entry per rule timer and holds the opaque `u64` handle; a
//! drive loop polls `process_expired()` and routes each due tick to the
//! owning rule timer. Entries auto-rearm at their interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::ScheduleError;

/// Default cap on concurrently armed timers
pub const DEFAULT_MAX_TIMERS: usize = 4096;

/// External timer-scheduler contract used by the rule-timer registry
pub trait TimerScheduler: Send + Sync {
    /// Arm a periodic timer for a rule; returns the opaque timer id
    fn arm(&self, rule_name: &str, interval: Duration) -> Result<u64, ScheduleError>;

    /// Change the interval of an armed timer, effective from its next tick
    fn rearm(&self, id: u64, interval: Duration) -> Result<(), ScheduleError>;

    /// Disarm and drop a timer. Returns whether the timer existed.
    fn cancel(&self, id: u64) -> bool;
}

/// One armed scheduler entry
#[derive(Debug, Clone)]
struct SchedulerEntry {
    rule_name: String,
    expires_at: Instant,
    interval: Duration,
}

/// A due tick returned by `process_expired`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTick {
    /// Opaque timer id
    pub id: u64,
    /// Name of the rule whose timer is due
    pub rule_name: String,
}

/// Poll-based periodic timer scheduler.
///
/// The drive loop sleeps for `next_expiration()` and then collects due
/// ticks with `process_expired()`. At most one tick per entry is produced
/// per poll, so ticks for one rule timer never overlap as long as a single
/// loop drives the scheduler.
pub struct PollScheduler {
    timers: RwLock<HashMap<u64, SchedulerEntry>>,
    next_id: AtomicU64,
    max_timers: usize,
}

impl PollScheduler {
    /// Create a scheduler with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TIMERS)
    }

    /// Create a scheduler capped at `max_timers` armed entries
    pub fn with_capacity(max_timers: usize) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_timers,
        }
    }

    /// Collect all due ticks and rearm their entries for the next interval
    pub fn process_expired(&self) -> Vec<ExpiredTick> {
        let now = Instant::now();
        let mut expired = Vec::new();

        if let Ok(mut timers) = self.timers.write() {
            for (id, entry) in timers.iter_mut() {
                if now >= entry.expires_at {
                    expired.push(ExpiredTick {
                        id: *id,
                        rule_name: entry.rule_name.clone(),
                    });
                    entry.expires_at = now + entry.interval;
                }
            }
        }

        expired
    }

    /// Time until the earliest entry is due; `None` when nothing is armed
    pub fn next_expiration(&self) -> Option<Duration> {
        let now = Instant::now();
        let timers = self.timers.read().ok()?;
        timers
            .values()
            .map(|e| e.expires_at.saturating_duration_since(now))
            .min()
    }

    /// Number of armed entries
    pub fn count(&self) -> usize {
        self.timers.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Disarm everything
    pub fn clear(&self) {
        if let Ok(mut timers) = self.timers.write() {
            timers.clear();
        }
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerScheduler for PollScheduler {
    fn arm(&self, rule_name: &str, interval: Duration) -> Result<u64, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval(interval));
        }

        let mut timers = self
            .timers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timers.len() >= self.max_timers {
            return Err(ScheduleError::Exhausted { max: self.max_timers });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        timers.insert(
            id,
            SchedulerEntry {
                rule_name: rule_name.to_string(),
                expires_at: Instant::now() + interval,
                interval,
            },
        );

        log::debug!("Timer armed: id={id} rule={rule_name} interval={interval:?}");
        Ok(id)
    }

    fn rearm(&self, id: u64, interval: Duration) -> Result<(), ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval(interval));
        }

        if let Ok(mut timers) = self.timers.write() {
            if let Some(entry) = timers.get_mut(&id) {
                entry.interval = interval;
                entry.expires_at = Instant::now() + interval;
                log::debug!("Timer rearmed: id={id} interval={interval:?}");
                return Ok(());
            }
        }
        Err(ScheduleError::NoSuchTimer(id))
    }

    fn cancel(&self, id: u64) -> bool {
        if let Ok(mut timers) = self.timers.write() {
            if timers.remove(&id).is_some() {
                log::debug!("Timer cancelled: id={id}");
                return true;
            }
        }
        false
    }
}
