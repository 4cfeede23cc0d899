//! Shared loop state: the lifecycle state machine plus collected failures.
//!
//! Every scheduled unit of work consults this to decide whether to keep
//! going. It is backed by a `watch` channel so units can also suspend until
//! the state changes.

use kairos_types::AgentLoopState;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::policy::ExecutionError;

pub struct LoopState {
    tx: watch::Sender<AgentLoopState>,
    failures: Mutex<Vec<ExecutionError>>,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(AgentLoopState::Initial),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> AgentLoopState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.get().is_running()
    }

    /// Move to `next` if the state machine allows it. Returns whether it moved.
    pub fn transition(&self, next: AgentLoopState) -> bool {
        let mut from = None;
        let moved = self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            debug!(%from, to = %next, "agent loop state changed");
        }
        moved
    }

    /// Request a cooperative shutdown.
    pub fn request_stop(&self) -> bool {
        self.transition(AgentLoopState::Stopping)
    }

    /// Record a fatal outcome and move towards shutdown.
    ///
    /// A stop-runtime signal asks for a graceful stop; anything else puts the
    /// loop in the error state.
    pub fn fail(&self, error: ExecutionError) {
        let next = if error.is_stop_runtime() {
            AgentLoopState::Stopping
        } else {
            AgentLoopState::Error
        };
        self.failures.lock().push(error);
        self.transition(next);
    }

    pub(crate) fn take_failures(&self) -> Vec<ExecutionError> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Suspend until `predicate` holds for the current state.
    pub async fn wait_for(&self, predicate: impl Fn(AgentLoopState) -> bool) -> AgentLoopState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.get(),
        }
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopState")
            .field("state", &self.get())
            .field("failures", &self.failures.lock().len())
            .finish()
    }
}
