//! Cooperative agent loop.
//!
//! Four units of work run concurrently on the tokio runtime:
//!
//! 1. the envelope processor, suspended on the inbox, dispatching one
//!    envelope per wake-up;
//! 2. the internal message processor, suspended on the internal queue;
//! 3. the registration poller, which every `new_behaviours_poll_secs`
//!    absorbs new components and reconciles periodic callers with the
//!    active behaviour set;
//! 4. the stop watcher, which returns once the state leaves `started`.
//!
//! Each active behaviour additionally gets its own [`PeriodicCaller`]. The
//! first unit to finish ends the loop; every periodic caller is shut down
//! before the final state is reported, on the stop path and the error path
//! alike.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use kairos_types::{AgentLoopState, ComponentId};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{AgentLoop, LoopError, LoopState, begin, finish};
use crate::agent::AgentContext;
use crate::periodic::PeriodicCaller;
use crate::policy::ExecutionError;
use crate::skill::SharedBehaviour;

pub struct AsyncAgentLoop {
    context: Arc<AgentContext>,
    state: Arc<LoopState>,
    callers: DashMap<ComponentId, PeriodicCaller>,
}

impl AsyncAgentLoop {
    pub fn new(context: Arc<AgentContext>, state: Arc<LoopState>) -> Self {
        Self {
            context,
            state,
            callers: DashMap::new(),
        }
    }

    /// Number of behaviours that currently have a periodic caller.
    pub fn scheduled_behaviours(&self) -> usize {
        self.callers.len()
    }

    /// Run until stopped or until a unit of work fails fatally.
    pub async fn run(&self) -> Result<(), LoopError> {
        if !begin(&self.state)? {
            return Ok(());
        }
        info!(mode = "cooperative", "agent loop started");

        self.sync_periodic_callers();

        let outcome = tokio::select! {
            r = self.process_envelopes() => r,
            r = self.process_internal_messages() => r,
            () = self.poll_new_registrations() => Ok(()),
            state = self.state.wait_for(|s| !s.is_running()) => {
                debug!(%state, "agent loop leaving");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            self.state.fail(e);
        }

        self.shutdown_periodic_callers().await;
        finish(&self.state)
    }

    async fn process_envelopes(&self) -> Result<(), ExecutionError> {
        loop {
            let inbox = self.context.inbox();
            inbox.wait_until_nonempty().await;
            // Once stopping, envelopes stay queued.
            if !self.state.is_running() {
                return Ok(());
            }
            let Ok(envelope) = inbox.get_nowait() else {
                continue;
            };
            self.context.react_one(envelope)?;
            tokio::task::yield_now().await;
        }
    }

    async fn process_internal_messages(&self) -> Result<(), ExecutionError> {
        loop {
            let queue = self.context.internal_queue();
            queue.wait_until_nonempty().await;
            if !self.state.is_running() {
                return Ok(());
            }
            let Ok(message) = queue.get_nowait() else {
                continue;
            };
            self.context.filter().route_internal_message(message)?;
            tokio::task::yield_now().await;
        }
    }

    async fn poll_new_registrations(&self) {
        let mut ticker = tokio::time::interval(self.context.config().new_behaviours_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start-up already synced.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let added = self.context.filter().absorb_new_registrations();
            if added > 0 {
                debug!(added, "absorbed new components");
            }
            self.sync_periodic_callers();
        }
    }

    /// Give every active behaviour a periodic caller and retire the callers
    /// of behaviours that are done, gone, or whose skill went inactive.
    fn sync_periodic_callers(&self) {
        let active = self.context.filter().active_behaviours();
        let active_ids: BTreeSet<&ComponentId> = active.iter().map(|(id, _)| id).collect();

        self.callers.retain(|id, caller| {
            let keep = active_ids.contains(id);
            if !keep {
                debug!(component = %id, "unregistering periodic caller");
                caller.stop();
            }
            keep
        });

        for (id, behaviour) in &active {
            if self.callers.contains_key(id) {
                continue;
            }
            let caller = self.spawn_caller(id.clone(), Arc::clone(behaviour));
            self.callers.insert(id.clone(), caller);
        }
    }

    fn spawn_caller(&self, id: ComponentId, behaviour: SharedBehaviour) -> PeriodicCaller {
        let (tick_interval, start_at) = {
            let b = behaviour.lock();
            (b.tick_interval(), b.start_at())
        };
        debug!(component = %id, ?tick_interval, ?start_at, "registering periodic caller");

        let context = Arc::clone(&self.context);
        let state = Arc::clone(&self.state);
        let on_error_state = Arc::clone(&self.state);
        let name = id.to_string();

        PeriodicCaller::start(
            name,
            move || {
                if !state.is_running() {
                    return Ok(());
                }
                context.behaviour_act(&id, &behaviour)
            },
            tick_interval,
            start_at,
            move |e: ExecutionError| on_error_state.fail(e),
        )
    }

    async fn shutdown_periodic_callers(&self) {
        let ids: Vec<ComponentId> = self.callers.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, caller)) = self.callers.remove(&id) {
                caller.shutdown().await;
            }
        }
        debug!("all periodic callers unregistered");
    }
}

impl AgentLoop for AsyncAgentLoop {
    fn state(&self) -> AgentLoopState {
        self.state.get()
    }

    fn stop(&self) {
        self.state.request_stop();
    }
}

impl std::fmt::Debug for AsyncAgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncAgentLoop")
            .field("state", &self.state.get())
            .field("periodic_callers", &self.callers.len())
            .finish()
    }
}
