//! Blocking agent loop: one OS thread spinning `act; react; update`.
//!
//! No periodic callers are involved. Every active behaviour acts once per
//! spin whatever its tick interval, and the thread sleeps `period_secs`
//! between spins.

use std::sync::Arc;

use kairos_types::AgentLoopState;
use tracing::info;

use super::{AgentLoop, LoopError, LoopState, begin, finish};
use crate::agent::AgentContext;
use crate::policy::ExecutionError;

pub struct SyncAgentLoop {
    context: Arc<AgentContext>,
    state: Arc<LoopState>,
}

impl SyncAgentLoop {
    pub fn new(context: Arc<AgentContext>, state: Arc<LoopState>) -> Self {
        Self { context, state }
    }

    /// Spin on the calling thread until stopped or until a spin fails fatally.
    ///
    /// Blocks; call it from a dedicated thread, not from an async task.
    pub fn run(&self) -> Result<(), LoopError> {
        if !begin(&self.state)? {
            return Ok(());
        }
        info!(mode = "blocking", "agent loop started");

        let period = self.context.config().period();
        while self.state.is_running() {
            if let Err(e) = self.spin() {
                self.state.fail(e);
                break;
            }
            std::thread::sleep(period);
        }
        finish(&self.state)
    }

    fn spin(&self) -> Result<(), ExecutionError> {
        self.context.act()?;
        self.context.react()?;
        self.context.update()
    }
}

impl AgentLoop for SyncAgentLoop {
    fn state(&self) -> AgentLoopState {
        self.state.get()
    }

    fn stop(&self) {
        self.state.request_stop();
    }
}

impl std::fmt::Debug for SyncAgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAgentLoop")
            .field("state", &self.state.get())
            .finish()
    }
}
