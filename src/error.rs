//! Policy core error types

use std::time::Duration;
use thiserror::Error;

/// Rule store errors, raised by `RuleSource` implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend unreachable or query failed
    #[error("Rule store backend error: {0}")]
    Backend(String),

    /// A row could not be turned into a usable rule
    #[error("Invalid rule in store: {0}")]
    InvalidRule(String),
}

/// Timer scheduler errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Interval rejected by the scheduler
    #[error("Invalid timer interval: {0:?}")]
    InvalidInterval(Duration),

    /// Scheduler cannot hold any more timers
    #[error("Timer capacity exhausted (max {max})")]
    Exhausted { max: usize },

    /// Operation on a timer id the scheduler does not know
    #[error("No such timer: {0}")]
    NoSuchTimer(u64),
}

/// Policy core error type
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Catalog reload failed; the previous catalog is retained
    #[error("Rule load failed: {0}")]
    Store(#[from] StoreError),

    /// A rule in the install batch maps to no signaling interface
    #[error("Rule {rule} is not installable on any interface")]
    UninstallableRule { rule: String },

    /// The external scheduler could not arm a rule timer
    #[error("Timer scheduling failed: {0}")]
    Schedule(#[from] ScheduleError),

    /// Operation on a context that was never initialized
    #[error("Policy context not initialized")]
    NotInitialized,

    /// A new session would exceed the configured session cap
    #[error("Maximum number of sessions reached (max {max})")]
    MaxSessionsExceeded { max: usize },
}

/// Policy core result type
pub type PolicyResult<T> = Result<T, PolicyError>;
