//! PCRF Policy-Decision Core
//!
//! This crate implements the policy-decision core of a PCRF:
//! - Rule evaluation: which rules to install/remove per session, and on
//!   which reference point (Gx, Sd, St) each change is signaled
//! - Shared rule timers: one periodic activation re-check per time-gated
//!   rule, fanning activation flips out to every dependent session
//! - Rule catalog: all provisioned rules, reloaded wholesale from an
//!   external rule store
//!
//! Storage, wire codecs and transport session management are external
//! collaborators reached through the `RuleSource`, `DeltaSink`, `Clock`
//! and `TimerScheduler` traits.

pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod rule;
pub mod rule_set;
pub mod scheduler;
pub mod time_gate;
pub mod timer;


// Re-export commonly used types
pub use config::PolicyConfig;
pub use context::PolicyContext;
pub use error::{PolicyError, PolicyResult, ScheduleError, StoreError};
pub use evaluator::{DeltaSink, Interface, RuleEvaluation, RuleEvaluator};
pub use rule::{MemoryRuleSource, Rule, RuleCatalog, RuleSource, FEATURE_GX, FEATURE_SD, FEATURE_ST};
pub use rule_set::{RuleSet, SessionId};
pub use scheduler::{PollScheduler, TimerScheduler};
pub use time_gate::{eligible_now, Clock, FixedClock, SystemClock};
pub use timer::{RuleTimer, RuleTimerRegistry};
