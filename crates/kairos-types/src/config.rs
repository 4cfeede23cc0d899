//! Agent configuration types.
//!
//! `AgentConfig` is deserialized from a TOML file. All fields have defaults,
//! but an unknown exception policy is rejected rather than defaulted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policy::ExceptionPolicy;

/// Scheduling strategy for the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Single scheduler running periodic callers and queue waiters.
    #[default]
    Cooperative,
    /// One OS thread spinning `act; react; update` with a fixed sleep.
    Blocking,
}

/// Top-level configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Address used as sender of envelopes the agent emits itself.
    /// Defaults to `name` when absent.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub exception_policy: ExceptionPolicy,

    #[serde(default)]
    pub loop_mode: LoopMode,

    /// Sleep between spins of the blocking strategy.
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,

    /// Upper bound of envelopes handled by one `react()` call.
    #[serde(default = "default_max_reactions")]
    pub max_reactions: usize,

    /// How often the cooperative loop looks for newly published behaviours.
    #[serde(default = "default_new_behaviours_poll_secs")]
    pub new_behaviours_poll_secs: f64,

    /// Skill calls running longer than this are reported. 0 disables.
    #[serde(default)]
    pub execution_timeout_secs: f64,

    /// Send an error envelope back to the sender on dispatch faults.
    #[serde(default)]
    pub error_replies: bool,
}

fn default_name() -> String {
    "agent".to_string()
}

fn default_period_secs() -> f64 {
    0.05
}

fn default_max_reactions() -> usize {
    20
}

fn default_new_behaviours_poll_secs() -> f64 {
    1.0
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: None,
            exception_policy: ExceptionPolicy::default(),
            loop_mode: LoopMode::default(),
            period_secs: default_period_secs(),
            max_reactions: default_max_reactions(),
            new_behaviours_poll_secs: default_new_behaviours_poll_secs(),
            execution_timeout_secs: 0.0,
            error_replies: false,
        }
    }
}

impl AgentConfig {
    /// Config with the given agent name and defaults elsewhere.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Address the agent signs its own envelopes with.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    pub fn period(&self) -> Duration {
        secs(self.period_secs)
    }

    pub fn new_behaviours_poll_interval(&self) -> Duration {
        secs(self.new_behaviours_poll_secs)
    }

    /// `None` when the slow-call warning is disabled.
    pub fn execution_timeout(&self) -> Option<Duration> {
        (self.execution_timeout_secs > 0.0).then(|| secs(self.execution_timeout_secs))
    }

    /// Reject values that cannot drive a loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("agent name must not be empty".to_string()));
        }
        for (field, value) in [
            ("period_secs", self.period_secs),
            ("new_behaviours_poll_secs", self.new_behaviours_poll_secs),
            ("execution_timeout_secs", self.execution_timeout_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.new_behaviours_poll_secs == 0.0 {
            return Err(ConfigError::Invalid(
                "new_behaviours_poll_secs must be > 0".to_string(),
            ));
        }
        if self.max_reactions == 0 {
            return Err(ConfigError::Invalid("max_reactions must be > 0".to_string()));
        }
        Ok(())
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
