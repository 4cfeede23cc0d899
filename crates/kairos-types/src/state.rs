//! Agent loop lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an agent loop.
///
/// Transitions: `Initial -> Started -> {Stopping -> Stopped, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLoopState {
    Initial,
    Started,
    Stopping,
    Stopped,
    Error,
}

impl AgentLoopState {
    /// Whether the loop may keep scheduling work.
    pub fn is_running(self) -> bool {
        self == Self::Started
    }

    /// Whether the loop has finished, one way or the other.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use AgentLoopState::*;
        matches!(
            (self, next),
            (Initial, Started)
                | (Initial, Stopping)
                | (Started, Stopping)
                | (Started, Error)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }
}

impl fmt::Display for AgentLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
