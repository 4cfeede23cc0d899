//! Active-set resolver.
//!
//! The filter answers "which behaviours and handlers may run right now"
//! (registered, owning skill active, behaviour not done), absorbs the
//! behaviours and handlers skills publish while the agent is running, and
//! routes internal messages to the handler of their destination skill.

use std::sync::Arc;

use kairos_types::{ComponentId, Message, SkillId};
use tracing::{debug, warn};

use crate::policy::{ExecutionControl, ExecutionError};
use crate::queue::BridgingQueue;
use crate::registry::ComponentRegistry;
use crate::skill::behaviour::SharedBehaviour;
use crate::skill::handler::SharedHandler;

pub struct Filter {
    registry: Arc<ComponentRegistry>,
    control: Arc<ExecutionControl>,
}

impl Filter {
    pub fn new(registry: Arc<ComponentRegistry>, control: Arc<ExecutionControl>) -> Self {
        Self { registry, control }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Behaviours of active skills that are not done, ordered by id.
    pub fn active_behaviours(&self) -> Vec<(ComponentId, SharedBehaviour)> {
        self.registry
            .behaviours()
            .into_iter()
            .filter(|(id, behaviour)| {
                self.registry.is_skill_active(&id.skill) && !behaviour.lock().is_done()
            })
            .collect()
    }

    /// Active handlers for `protocol`.
    ///
    /// With `skill` set, returns at most the one handler of that skill;
    /// otherwise every active skill's handler for the protocol.
    pub fn active_handlers(
        &self,
        protocol: &str,
        skill: Option<&SkillId>,
    ) -> Vec<(ComponentId, SharedHandler)> {
        match skill {
            Some(skill) => self
                .registry
                .handler_for(protocol, skill)
                .filter(|_| self.registry.is_skill_active(skill))
                .into_iter()
                .collect(),
            None => self
                .registry
                .handlers_for_protocol(protocol)
                .into_iter()
                .filter(|(id, _)| self.registry.is_skill_active(&id.skill))
                .collect(),
        }
    }

    /// Drain every skill's publication queues into the registry.
    ///
    /// Each absorbed component is set up before it becomes visible. A
    /// component that fails to register or to set up is logged and skipped;
    /// the drain always continues. Returns how many components were added.
    pub fn absorb_new_registrations(&self) -> usize {
        let mut added = 0;
        for skill in self.registry.skills() {
            let skill_id = skill.skill_id();

            while let Ok(behaviour) = skill.new_behaviours().get_nowait() {
                let name = behaviour.name().to_string();
                match self.registry.register_behaviour(skill_id, behaviour) {
                    Ok((id, shared)) => {
                        if let Err(e) = self.control.run_exclusive(|| shared.lock().setup()) {
                            warn!(component = %id, error = %e, "setup of new behaviour failed, dropping it");
                            self.registry.unregister_behaviour(&id);
                            continue;
                        }
                        self.registry.mark_set_up(id.clone());
                        debug!(component = %id, "new behaviour absorbed");
                        added += 1;
                    }
                    Err(e) => {
                        warn!(skill = %skill_id, behaviour = %name, error = %e, "failed to register new behaviour");
                    }
                }
            }

            while let Ok(handler) = skill.new_handlers().get_nowait() {
                let name = handler.name().to_string();
                match self.registry.register_handler(skill_id, handler) {
                    Ok(id) => {
                        let setup = self
                            .registry
                            .handler(&id)
                            .map(|h| self.control.run_exclusive(|| h.lock().setup()));
                        if let Some(Err(e)) = setup {
                            warn!(component = %id, error = %e, "setup of new handler failed, dropping it");
                            self.registry.unregister_handler(&id);
                            continue;
                        }
                        self.registry.mark_set_up(id.clone());
                        debug!(component = %id, "new handler absorbed");
                        added += 1;
                    }
                    Err(e) => {
                        warn!(skill = %skill_id, handler = %name, error = %e, "failed to register new handler");
                    }
                }
            }
        }
        added
    }

    /// Deliver an internal message to the handler of the skill named in `message.to`.
    ///
    /// Unparseable destinations and missing handlers are logged and the
    /// message is dropped. Only a fatal policy outcome from the handler
    /// itself is returned.
    pub fn route_internal_message(&self, message: Message) -> Result<(), ExecutionError> {
        let skill_id: SkillId = match message.to.parse() {
            Ok(id) => id,
            Err(e) => {
                warn!(to = %message.to, error = %e, "invalid destination for internal message, dropped");
                return Ok(());
            }
        };

        let Some((id, handler)) = self
            .active_handlers(&message.protocol_id, Some(&skill_id))
            .into_iter()
            .next()
        else {
            warn!(
                skill = %skill_id,
                protocol = %message.protocol_id,
                "no active handler for internal message, dropped"
            );
            return Ok(());
        };

        self.control
            .execute(&id.to_string(), || handler.lock().handle(&message))
            .map(|_| ())
    }

    /// Route everything currently queued on `queue`.
    pub fn handle_internal_messages(&self, queue: &BridgingQueue<Message>) -> Result<(), ExecutionError> {
        while let Ok(message) = queue.get_nowait() {
            self.route_internal_message(message)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("registry", &self.registry)
            .finish()
    }
}
