//! Per-skill runtime context and the skill bundle handed to the agent.
//!
//! A `SkillContext` is shared (`Arc`) between the registry and the skill's own
//! components. Components use it to publish behaviours and handlers created
//! at runtime, to toggle the skill's active flag, and to send internal
//! messages to other skills. The publication queues are bridging queues, so
//! any thread may publish; the filter drains them on the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::bail;
use kairos_types::{Message, SkillId};
use tracing::debug;

use super::behaviour::Behaviour;
use super::handler::Handler;
use crate::queue::BridgingQueue;

pub struct SkillContext {
    skill_id: SkillId,
    active: AtomicBool,
    new_behaviours: BridgingQueue<Box<dyn Behaviour>>,
    new_handlers: BridgingQueue<Box<dyn Handler>>,
    /// Internal message queue of the agent, attached on registration.
    internal_queue: OnceLock<Arc<BridgingQueue<Message>>>,
}

impl SkillContext {
    pub fn new(skill_id: SkillId) -> Self {
        Self {
            skill_id,
            active: AtomicBool::new(true),
            new_behaviours: BridgingQueue::new(),
            new_handlers: BridgingQueue::new(),
            internal_queue: OnceLock::new(),
        }
    }

    pub fn skill_id(&self) -> &SkillId {
        &self.skill_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Inactive skills contribute nothing to the active set.
    pub fn set_active(&self, value: bool) {
        self.active.store(value, Ordering::Release);
        debug!(skill = %self.skill_id, is_active = value, "skill active flag changed");
    }

    /// Publish a behaviour created at runtime. Picked up by the next absorption pass.
    pub fn spawn_behaviour(&self, behaviour: Box<dyn Behaviour>) {
        self.new_behaviours.put(behaviour);
    }

    /// Publish a handler created at runtime. Picked up by the next absorption pass.
    pub fn spawn_handler(&self, handler: Box<dyn Handler>) {
        self.new_handlers.put(handler);
    }

    pub fn new_behaviours(&self) -> &BridgingQueue<Box<dyn Behaviour>> {
        &self.new_behaviours
    }

    pub fn new_handlers(&self) -> &BridgingQueue<Box<dyn Handler>> {
        &self.new_handlers
    }

    /// Queue a message for another skill of the same agent.
    ///
    /// `message.to` must name the destination skill (`author/name`).
    pub fn send_to_skill(&self, message: Message) -> anyhow::Result<()> {
        if !message.has_to() {
            bail!("message.to is not set");
        }
        if !message.has_sender() {
            bail!("message.sender is not set");
        }
        match self.internal_queue.get() {
            Some(queue) => {
                queue.put(message);
                Ok(())
            }
            None => bail!("skill {} is not attached to an agent", self.skill_id),
        }
    }

    pub(crate) fn attach_internal_queue(&self, queue: Arc<BridgingQueue<Message>>) {
        // A context registered twice keeps its first agent.
        let _ = self.internal_queue.set(queue);
    }
}

impl std::fmt::Debug for SkillContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillContext")
            .field("skill_id", &self.skill_id)
            .field("is_active", &self.is_active())
            .field("pending_behaviours", &self.new_behaviours.len())
            .field("pending_handlers", &self.new_handlers.len())
            .finish()
    }
}

/// A skill as handed to the agent by the (external) loader.
pub struct Skill {
    context: Arc<SkillContext>,
    behaviours: Vec<Box<dyn Behaviour>>,
    handlers: Vec<Box<dyn Handler>>,
}

impl Skill {
    pub fn new(skill_id: SkillId) -> Self {
        Self::with_context(Arc::new(SkillContext::new(skill_id)))
    }

    /// Build around a context the skill's components already hold.
    pub fn with_context(context: Arc<SkillContext>) -> Self {
        Self {
            context,
            behaviours: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn behaviour(mut self, behaviour: impl Behaviour + 'static) -> Self {
        self.behaviours.push(Box::new(behaviour));
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn context(&self) -> &Arc<SkillContext> {
        &self.context
    }

    pub fn id(&self) -> &SkillId {
        self.context.skill_id()
    }

    pub(crate) fn into_parts(self) -> (Arc<SkillContext>, Vec<Box<dyn Behaviour>>, Vec<Box<dyn Handler>>) {
        (self.context, self.behaviours, self.handlers)
    }
}
