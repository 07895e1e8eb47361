//! Time-Gated Rule Eligibility
//!
//! Pure time-based eligibility predicate for rules, evaluated against an
//! injectable clock:
//! - `time_mask` is an hour-of-day bitmask: bit `h` set means the rule is
//!   eligible during UTC hour `h`. A mask of 0 places no restriction.
//! - `time_of_day` is an optional comma-separated list of `HH:MM-HH:MM`
//!   windows. Windows may wrap past midnight. An empty expression places
//!   no restriction; malformed segments are skipped.
//!
//! A rule is eligible when both restrictions pass.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use std::sync::Mutex;

use crate::rule::Rule;

/// Injectable time source
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable time source for tests and replay
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at the given time
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to a new time
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut t) = self.now.lock() {
            *t = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|t| *t).unwrap_or_else(|_| Utc::now())
    }
}

/// Parse a time-of-day expression into (start, end) windows.
///
/// Malformed segments are dropped with a warning rather than failing the
/// whole expression.
pub fn parse_time_windows(expr: &str) -> Vec<(NaiveTime, NaiveTime)> {
    let mut windows = Vec::new();
    for segment in expr.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match parse_window(segment) {
            Some(window) => windows.push(window),
            None => log::warn!("Skipping malformed time-of-day segment: {segment:?}"),
        }
    }
    windows
}

fn parse_window(segment: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = segment.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((start, end))
}

fn in_window(t: NaiveTime, window: (NaiveTime, NaiveTime)) -> bool {
    let (start, end) = window;
    if start <= end {
        start <= t && t < end
    } else {
        // Wrap-around window, e.g. 22:00-06:00
        t >= start || t < end
    }
}

/// Whether the rule is eligible to be active at `now`.
///
/// Pure function: same rule and timestamp always yield the same answer.
pub fn eligible_now(rule: &Rule, now: DateTime<Utc>) -> bool {
    if rule.time_mask != 0 {
        let hour_bit = 1u64 << now.hour();
        if rule.time_mask & hour_bit == 0 {
            return false;
        }
    }

    if !rule.time_of_day.is_empty() {
        let windows = parse_time_windows(&rule.time_of_day);
        if !windows.is_empty() {
            let t = now.time();
            return windows.iter().any(|&w| in_window(t, w));
        }
    }

    true
}
