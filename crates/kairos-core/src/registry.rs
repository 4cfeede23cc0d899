//! Component registry: skills, behaviours and handlers of one agent.
//!
//! Behaviours are indexed by [`ComponentId`]. Handlers are indexed twice: by
//! component id, and by `(protocol, skill)` so the dispatcher can resolve
//! "the handler of skill S for protocol P" directly. A skill holds at most
//! one handler per protocol.
//!
//! Mutation happens on the scheduler (agent construction and the absorption
//! pass); the locks only make the structure shareable between tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kairos_types::{ComponentId, RegistryError, SkillId};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::skill::behaviour::{Behaviour, SharedBehaviour, share_behaviour};
use crate::skill::context::SkillContext;
use crate::skill::handler::{Handler, SharedHandler, share_handler};

#[derive(Default)]
struct HandlerIndex {
    by_id: BTreeMap<ComponentId, SharedHandler>,
    /// protocol -> skill -> component id
    by_protocol: BTreeMap<String, BTreeMap<SkillId, ComponentId>>,
}

/// Registry of every component the agent knows about.
#[derive(Default)]
pub struct ComponentRegistry {
    skills: RwLock<BTreeMap<SkillId, Arc<SkillContext>>>,
    behaviours: RwLock<BTreeMap<ComponentId, SharedBehaviour>>,
    handlers: RwLock<HandlerIndex>,
    /// Components whose `setup` succeeded and that still owe a `teardown`.
    set_up: Mutex<BTreeSet<ComponentId>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- skills ---------------------------------------------------------------

    pub fn register_skill(&self, context: Arc<SkillContext>) -> Result<(), RegistryError> {
        let mut skills = self.skills.write();
        let id = context.skill_id().clone();
        if skills.contains_key(&id) {
            return Err(RegistryError::SkillAlreadyRegistered(id));
        }
        debug!(skill = %id, "skill registered");
        skills.insert(id, context);
        Ok(())
    }

    pub fn skill(&self, id: &SkillId) -> Option<Arc<SkillContext>> {
        self.skills.read().get(id).cloned()
    }

    pub fn skills(&self) -> Vec<Arc<SkillContext>> {
        self.skills.read().values().cloned().collect()
    }

    pub fn is_skill_active(&self, id: &SkillId) -> bool {
        self.skills
            .read()
            .get(id)
            .is_some_and(|ctx| ctx.is_active())
    }

    // -- behaviours -----------------------------------------------------------

    pub fn register_behaviour(
        &self,
        skill: &SkillId,
        behaviour: Box<dyn Behaviour>,
    ) -> Result<(ComponentId, SharedBehaviour), RegistryError> {
        if !self.skills.read().contains_key(skill) {
            return Err(RegistryError::SkillNotFound(skill.clone()));
        }
        let id = ComponentId::new(skill.clone(), behaviour.name());
        let mut behaviours = self.behaviours.write();
        if behaviours.contains_key(&id) {
            return Err(RegistryError::ComponentAlreadyRegistered(id));
        }
        let shared = share_behaviour(behaviour);
        behaviours.insert(id.clone(), Arc::clone(&shared));
        debug!(component = %id, "behaviour registered");
        Ok((id, shared))
    }

    pub fn unregister_behaviour(&self, id: &ComponentId) -> Option<SharedBehaviour> {
        self.set_up.lock().remove(id);
        self.behaviours.write().remove(id)
    }

    pub fn behaviour(&self, id: &ComponentId) -> Option<SharedBehaviour> {
        self.behaviours.read().get(id).cloned()
    }

    /// Snapshot of every registered behaviour, ordered by id.
    pub fn behaviours(&self) -> Vec<(ComponentId, SharedBehaviour)> {
        self.behaviours
            .read()
            .iter()
            .map(|(id, b)| (id.clone(), Arc::clone(b)))
            .collect()
    }

    // -- handlers -------------------------------------------------------------

    pub fn register_handler(
        &self,
        skill: &SkillId,
        handler: Box<dyn Handler>,
    ) -> Result<ComponentId, RegistryError> {
        if !self.skills.read().contains_key(skill) {
            return Err(RegistryError::SkillNotFound(skill.clone()));
        }
        let id = ComponentId::new(skill.clone(), handler.name());
        let protocol = handler.supported_protocol().to_string();

        let mut index = self.handlers.write();
        if index.by_id.contains_key(&id) {
            return Err(RegistryError::ComponentAlreadyRegistered(id));
        }
        if index
            .by_protocol
            .get(&protocol)
            .is_some_and(|skills| skills.contains_key(skill))
        {
            return Err(RegistryError::HandlerAlreadyRegistered {
                protocol,
                skill: skill.clone(),
            });
        }
        index.by_id.insert(id.clone(), share_handler(handler));
        index
            .by_protocol
            .entry(protocol.clone())
            .or_default()
            .insert(skill.clone(), id.clone());
        debug!(component = %id, %protocol, "handler registered");
        Ok(id)
    }

    pub fn unregister_handler(&self, id: &ComponentId) -> Option<SharedHandler> {
        let mut index = self.handlers.write();
        let handler = index.by_id.remove(id)?;
        self.set_up.lock().remove(id);
        let mut emptied = None;
        for (protocol, skills) in index.by_protocol.iter_mut() {
            if skills.get(&id.skill) == Some(id) {
                skills.remove(&id.skill);
                if skills.is_empty() {
                    emptied = Some(protocol.clone());
                }
                break;
            }
        }
        if let Some(protocol) = emptied {
            index.by_protocol.remove(&protocol);
        }
        Some(handler)
    }

    pub fn handler(&self, id: &ComponentId) -> Option<SharedHandler> {
        self.handlers.read().by_id.get(id).cloned()
    }

    /// Handler of `skill` for `protocol`, if registered.
    pub fn handler_for(&self, protocol: &str, skill: &SkillId) -> Option<(ComponentId, SharedHandler)> {
        let index = self.handlers.read();
        let id = index.by_protocol.get(protocol)?.get(skill)?;
        let handler = index.by_id.get(id)?;
        Some((id.clone(), Arc::clone(handler)))
    }

    /// Every handler registered for `protocol`, ordered by skill.
    pub fn handlers_for_protocol(&self, protocol: &str) -> Vec<(ComponentId, SharedHandler)> {
        let index = self.handlers.read();
        let Some(skills) = index.by_protocol.get(protocol) else {
            return Vec::new();
        };
        skills
            .values()
            .filter_map(|id| index.by_id.get(id).map(|h| (id.clone(), Arc::clone(h))))
            .collect()
    }

    pub fn handlers(&self) -> Vec<(ComponentId, SharedHandler)> {
        self.handlers
            .read()
            .by_id
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect()
    }

    // -- lifecycle ------------------------------------------------------------

    /// Call `setup` on every component not yet set up. Stops at the first
    /// failure; components set up before it stay set up.
    pub fn setup(&self) -> Result<(), (ComponentId, anyhow::Error)> {
        for (id, behaviour) in self.behaviours() {
            if self.is_set_up(&id) {
                continue;
            }
            behaviour.lock().setup().map_err(|e| (id.clone(), e))?;
            self.mark_set_up(id);
        }
        for (id, handler) in self.handlers() {
            if self.is_set_up(&id) {
                continue;
            }
            handler.lock().setup().map_err(|e| (id.clone(), e))?;
            self.mark_set_up(id);
        }
        Ok(())
    }

    /// Record that `id` completed `setup` outside of [`Self::setup`].
    pub(crate) fn mark_set_up(&self, id: ComponentId) {
        self.set_up.lock().insert(id);
    }

    pub fn is_set_up(&self, id: &ComponentId) -> bool {
        self.set_up.lock().contains(id)
    }

    /// Call `teardown` on every component whose `setup` ran. Failures are
    /// logged, never fatal.
    pub fn teardown(&self) {
        let set_up = std::mem::take(&mut *self.set_up.lock());
        for (id, behaviour) in self.behaviours() {
            if !set_up.contains(&id) {
                continue;
            }
            if let Err(e) = behaviour.lock().teardown() {
                warn!(component = %id, error = %e, "behaviour teardown failed");
            }
        }
        for (id, handler) in self.handlers() {
            if !set_up.contains(&id) {
                continue;
            }
            if let Err(e) = handler.lock().teardown() {
                warn!(component = %id, error = %e, "handler teardown failed");
            }
        }
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("skills", &self.skills.read().len())
            .field("behaviours", &self.behaviours.read().len())
            .field("handlers", &self.handlers.read().by_id.len())
            .finish()
    }
}
