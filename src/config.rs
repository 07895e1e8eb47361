//! Policy Core Configuration
//!
//! Configuration structures and YAML parsing for the policy-decision core.
//! Values not present in the YAML document fall back to their defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default rule-timer polling interval in seconds
pub const DEFAULT_TIMER_INTERVAL_SECS: u64 = 10;

/// Default maximum number of concurrently tracked sessions
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Policy core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Whether time-gated rules get a periodic re-check timer
    pub enable_rule_timers: bool,
    /// Polling interval for rule timers, in seconds
    pub timer_interval_secs: u64,
    /// Default failure mode when an install batch contains a rule
    /// with no eligible interface
    pub fail_on_uninstallable_rule: bool,
    /// Maximum number of concurrently tracked sessions
    pub max_sessions: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enable_rule_timers: true,
            timer_interval_secs: DEFAULT_TIMER_INTERVAL_SECS,
            fail_on_uninstallable_rule: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl PolicyConfig {
    /// Parse configuration from a YAML document
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        let config: PolicyConfig =
            serde_yaml::from_str(doc).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timer_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Timer polling interval as a `Duration`
    pub fn timer_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timer_interval_secs)
    }
}
