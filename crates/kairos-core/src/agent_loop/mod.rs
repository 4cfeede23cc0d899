//! Agent loop strategies.
//!
//! - `cooperative` -- `AsyncAgentLoop`: queue waiters and one periodic
//!   caller per behaviour, all on the tokio runtime
//! - `blocking` -- `SyncAgentLoop`: one OS thread spinning `act; react;
//!   update` and sleeping a fixed period
//! - `state` -- `LoopState`, the lifecycle state machine both share
//!
//! The two strategies deliberately differ in timing: only the cooperative
//! one honours each behaviour's tick interval.

pub mod blocking;
pub mod cooperative;
pub mod state;

use kairos_types::AgentLoopState;
use thiserror::Error;
use tracing::{debug, error};

use crate::policy::ExecutionError;

pub use blocking::SyncAgentLoop;
pub use cooperative::AsyncAgentLoop;
pub use state::LoopState;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("agent loop cannot start from state `{0}`")]
    AlreadyStarted(AgentLoopState),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Operations common to both scheduling strategies.
pub trait AgentLoop: Send + Sync {
    fn state(&self) -> AgentLoopState;

    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Ask the loop to wind down. Safe from any thread.
    fn stop(&self);
}

/// Move `state` from `initial` to `started`.
///
/// Returns `Ok(false)` when a stop was requested before the loop ever ran:
/// the loop then goes straight to `stopped` and must not schedule anything.
pub(crate) fn begin(state: &LoopState) -> Result<bool, LoopError> {
    match state.get() {
        AgentLoopState::Initial => {
            state.transition(AgentLoopState::Started);
            Ok(true)
        }
        AgentLoopState::Stopping => {
            state.transition(AgentLoopState::Stopped);
            Ok(false)
        }
        other => Err(LoopError::AlreadyStarted(other)),
    }
}

/// Settle the final state once every unit of work has unwound.
///
/// All collected failures are logged; the first one is returned.
pub(crate) fn finish(state: &LoopState) -> Result<(), LoopError> {
    let mut failures = state.take_failures();
    if failures.is_empty() {
        state.transition(AgentLoopState::Stopped);
        debug!("agent loop stopped");
        return Ok(());
    }

    for failure in &failures {
        error!(
            component = failure.origin(),
            stop_runtime = failure.is_stop_runtime(),
            error = %failure.original(),
            "agent loop failure"
        );
    }
    // A pure stop request ends in `stopped`, anything else stays in `error`.
    state.transition(AgentLoopState::Stopped);
    Err(LoopError::Execution(failures.remove(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_from_initial_starts() {
        let state = LoopState::new();
        assert!(begin(&state).unwrap());
        assert_eq!(state.get(), AgentLoopState::Started);
        assert!(matches!(begin(&state), Err(LoopError::AlreadyStarted(AgentLoopState::Started))));
    }

    #[test]
    fn stop_before_start_goes_straight_to_stopped() {
        let state = LoopState::new();
        state.request_stop();
        assert!(!begin(&state).unwrap());
        assert_eq!(state.get(), AgentLoopState::Stopped);
    }

    #[test]
    fn finish_returns_first_failure() {
        let state = LoopState::new();
        begin(&state).unwrap();
        state.fail(ExecutionError::Propagated {
            origin: "acme/a:first".into(),
            source: anyhow::anyhow!("first"),
        });
        state.fail(ExecutionError::Propagated {
            origin: "acme/a:second".into(),
            source: anyhow::anyhow!("second"),
        });
        let err = finish(&state).unwrap_err();
        let LoopError::Execution(err) = err else {
            panic!("expected execution error");
        };
        assert_eq!(err.origin(), "acme/a:first");
        assert_eq!(state.get(), AgentLoopState::Error);
    }

    #[test]
    fn finish_after_stop_runtime_ends_stopped() {
        let state = LoopState::new();
        begin(&state).unwrap();
        state.fail(ExecutionError::StopRuntime {
            origin: "acme/a:b".into(),
            source: anyhow::anyhow!("halt"),
        });
        let err = finish(&state).unwrap_err();
        assert!(matches!(err, LoopError::Execution(ref e) if e.is_stop_runtime()));
        assert_eq!(state.get(), AgentLoopState::Stopped);
    }
}
