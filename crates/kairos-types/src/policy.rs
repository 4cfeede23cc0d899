//! Exception policy for faults raised by skill code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do when a behaviour or handler returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExceptionPolicy {
    /// Re-raise: the loop moves to `error`.
    #[default]
    Propagate,
    /// Log, then raise the stop-runtime signal.
    StopAndExit,
    /// Log and keep going.
    JustLog,
}

impl ExceptionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propagate => "propagate",
            Self::StopAndExit => "stop_and_exit",
            Self::JustLog => "just_log",
        }
    }
}

impl FromStr for ExceptionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "propagate" => Ok(Self::Propagate),
            "stop_and_exit" => Ok(Self::StopAndExit),
            "just_log" => Ok(Self::JustLog),
            other => Err(ConfigError::UnsupportedExceptionPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for ExceptionPolicy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExceptionPolicy> for String {
    fn from(policy: ExceptionPolicy) -> Self {
        policy.as_str().to_string()
    }
}

impl fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
