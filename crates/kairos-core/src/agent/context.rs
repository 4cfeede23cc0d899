//! Runtime context shared by the agent and its loop.
//!
//! Holds the queues, the registry, the filter, the dispatcher and the
//! execution control of one agent. Loops own an `Arc` to it; nothing in
//! here refers back to a loop.

use std::sync::Arc;

use kairos_types::{AgentConfig, ComponentId, Envelope, Message};
use tracing::trace;

use crate::dispatcher::EnvelopeDispatcher;
use crate::error_handler::ErrorHandler;
use crate::filter::Filter;
use crate::policy::{ExecutionControl, ExecutionError};
use crate::queue::{BridgingQueue, EnvelopeSink};
use crate::registry::ComponentRegistry;
use crate::skill::SharedBehaviour;

pub struct AgentContext {
    pub(crate) config: AgentConfig,
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) filter: Arc<Filter>,
    pub(crate) dispatcher: EnvelopeDispatcher,
    pub(crate) control: Arc<ExecutionControl>,
    pub(crate) error_handler: Arc<ErrorHandler>,
    pub(crate) inbox: Arc<BridgingQueue<Envelope>>,
    pub(crate) internal_queue: Arc<BridgingQueue<Message>>,
    pub(crate) outbox: Arc<dyn EnvelopeSink>,
}

impl AgentContext {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }

    pub fn dispatcher(&self) -> &EnvelopeDispatcher {
        &self.dispatcher
    }

    pub fn control(&self) -> &Arc<ExecutionControl> {
        &self.control
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    /// Inbound envelopes, fed by the transport layer.
    pub fn inbox(&self) -> &Arc<BridgingQueue<Envelope>> {
        &self.inbox
    }

    /// Skill-to-skill and decision-maker traffic.
    pub fn internal_queue(&self) -> &Arc<BridgingQueue<Message>> {
        &self.internal_queue
    }

    /// Hand an envelope to the transport layer.
    pub fn send(&self, envelope: Envelope) {
        self.outbox.send(envelope);
    }

    /// Queue a message for the skill named in `message.to`.
    pub fn send_to_skill(&self, message: Message) -> anyhow::Result<()> {
        if !message.has_to() {
            anyhow::bail!("message.to is not set");
        }
        if !message.has_sender() {
            anyhow::bail!("message.sender is not set");
        }
        self.internal_queue.put(message);
        Ok(())
    }

    // -- proactive ------------------------------------------------------------

    /// Run one `act` of every active behaviour, regardless of tick interval.
    pub fn act(&self) -> Result<(), ExecutionError> {
        for (id, behaviour) in self.filter.active_behaviours() {
            self.behaviour_act(&id, &behaviour)?;
        }
        Ok(())
    }

    /// Run one `act` of a single behaviour under the exception policy.
    ///
    /// A behaviour that turned done since it was scheduled is skipped.
    pub fn behaviour_act(&self, id: &ComponentId, behaviour: &SharedBehaviour) -> Result<(), ExecutionError> {
        self.control
            .execute(&id.to_string(), || {
                let mut behaviour = behaviour.lock();
                if behaviour.is_done() {
                    return Ok(());
                }
                behaviour.act()
            })
            .map(|_| ())
    }

    // -- reactive -------------------------------------------------------------

    /// Dispatch up to `max_reactions` queued envelopes. Returns how many ran.
    pub fn react(&self) -> Result<usize, ExecutionError> {
        let mut handled = 0;
        while handled < self.config.max_reactions {
            let Ok(envelope) = self.inbox.get_nowait() else {
                break;
            };
            handled += 1;
            self.react_one(envelope)?;
        }
        if handled > 0 {
            trace!(handled, "react pass done");
        }
        Ok(handled)
    }

    pub fn react_one(&self, envelope: Envelope) -> Result<(), ExecutionError> {
        self.dispatcher.dispatch(envelope)
    }

    // -- housekeeping ---------------------------------------------------------

    /// Route queued internal messages and absorb newly published components.
    pub fn update(&self) -> Result<(), ExecutionError> {
        self.filter.handle_internal_messages(&self.internal_queue)?;
        self.filter.absorb_new_registrations();
        Ok(())
    }

    // -- lifecycle ------------------------------------------------------------

    pub(crate) fn setup(&self) -> Result<(), (ComponentId, anyhow::Error)> {
        self.control.run_exclusive(|| self.registry.setup())
    }

    pub(crate) fn teardown(&self) {
        self.control.run_exclusive(|| self.registry.teardown());
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("name", &self.config.name)
            .field("registry", &self.registry)
            .field("inbox", &self.inbox.len())
            .field("internal_queue", &self.internal_queue.len())
            .field("error_handler", &self.error_handler)
            .finish()
    }
}
