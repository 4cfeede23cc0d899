//! Finite-state-machine behaviour.
//!
//! An [`FsmBehaviour`] owns named [`State`]s. Each tick it acts the current
//! state; once that state is done, the event it raised picks the next state
//! from the transition table. Reaching a final state, or raising an event
//! with no transition, ends the machine.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::behaviour::Behaviour;
use super::behaviours::DEFAULT_TICK;

/// A behaviour used as a state of an [`FsmBehaviour`].
pub trait State: Behaviour {
    /// Event raised by the state, read once it is done.
    fn event(&self) -> Option<&str> {
        None
    }

    /// Restore initial conditions. Called each time the state is re-entered.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    #[error("state `{0}` is already registered")]
    StateAlreadyRegistered(String),

    #[error("state `{0}` is not registered")]
    StateNotFound(String),

    #[error("transition from `{state}` on {event:?} is already registered")]
    TransitionAlreadyRegistered { state: String, event: Option<String> },

    #[error("transition from `{state}` on {event:?} to `{destination}` is not registered")]
    TransitionNotFound {
        state: String,
        event: Option<String>,
        destination: String,
    },
}

type ActStateFn = Box<dyn FnMut() -> anyhow::Result<Option<String>> + Send>;

/// State backed by a closure that runs once and returns the event to raise.
pub struct FnState {
    name: String,
    act: ActStateFn,
    event: Option<String>,
    done: bool,
}

impl FnState {
    pub fn new<F>(name: impl Into<String>, act: F) -> Self
    where
        F: FnMut() -> anyhow::Result<Option<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            act: Box::new(act),
            event: None,
            done: false,
        }
    }
}

impl Behaviour for FnState {
    fn name(&self) -> &str {
        &self.name
    }

    fn act(&mut self) -> anyhow::Result<()> {
        if self.done {
            return Ok(());
        }
        self.event = (self.act)()?;
        self.done = true;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

impl State for FnState {
    fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    fn reset(&mut self) {
        self.event = None;
        self.done = false;
    }
}

pub struct FsmBehaviour {
    name: String,
    states: BTreeMap<String, Box<dyn State>>,
    initial: Option<String>,
    final_states: BTreeSet<String>,
    current: Option<String>,
    /// state -> event -> next state
    transitions: BTreeMap<String, BTreeMap<Option<String>, String>>,
    tick_interval: Duration,
}

impl FsmBehaviour {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: BTreeMap::new(),
            initial: None,
            final_states: BTreeSet::new(),
            current: None,
            transitions: BTreeMap::new(),
            tick_interval: DEFAULT_TICK,
        }
    }

    pub fn every(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Register a state. An initial state also becomes the current one.
    pub fn register_state(
        &mut self,
        name: impl Into<String>,
        state: impl State + 'static,
        initial: bool,
    ) -> Result<(), FsmError> {
        let name = self.insert_state(name.into(), Box::new(state))?;
        if initial {
            self.initial = Some(name.clone());
            self.current = Some(name);
        }
        Ok(())
    }

    pub fn register_final_state(&mut self, name: impl Into<String>, state: impl State + 'static) -> Result<(), FsmError> {
        let name = self.insert_state(name.into(), Box::new(state))?;
        self.final_states.insert(name);
        Ok(())
    }

    fn insert_state(&mut self, name: String, state: Box<dyn State>) -> Result<String, FsmError> {
        if self.states.contains_key(&name) {
            return Err(FsmError::StateAlreadyRegistered(name));
        }
        self.states.insert(name.clone(), state);
        Ok(name)
    }

    pub fn unregister_state(&mut self, name: &str) -> Result<Box<dyn State>, FsmError> {
        let state = self
            .states
            .remove(name)
            .ok_or_else(|| FsmError::StateNotFound(name.to_string()))?;
        if self.initial.as_deref() == Some(name) {
            self.initial = None;
        }
        self.final_states.remove(name);
        Ok(state)
    }

    /// Register `state --event--> destination`. States are not checked to
    /// exist; an unknown destination ends the machine when reached.
    pub fn register_transition(
        &mut self,
        state: impl Into<String>,
        destination: impl Into<String>,
        event: Option<&str>,
    ) -> Result<(), FsmError> {
        let state = state.into();
        let event = event.map(str::to_string);
        let edges = self.transitions.entry(state.clone()).or_default();
        if edges.contains_key(&event) {
            return Err(FsmError::TransitionAlreadyRegistered { state, event });
        }
        edges.insert(event, destination.into());
        Ok(())
    }

    pub fn unregister_transition(&mut self, state: &str, destination: &str, event: Option<&str>) -> Result<(), FsmError> {
        let event = event.map(str::to_string);
        let Some(edges) = self
            .transitions
            .get_mut(state)
            .filter(|edges| edges.get(&event).is_some_and(|d| d == destination))
        else {
            return Err(FsmError::TransitionNotFound {
                state: state.to_string(),
                event,
                destination: destination.to_string(),
            });
        };
        edges.remove(&event);
        if edges.is_empty() {
            self.transitions.remove(state);
        }
        Ok(())
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn state(&self, name: &str) -> Option<&dyn State> {
        self.states.get(name).map(|s| s.as_ref())
    }

    pub fn initial_state(&self) -> Option<&str> {
        self.initial.as_deref()
    }

    /// Make `name` the initial and current state.
    pub fn set_initial_state(&mut self, name: &str) -> Result<(), FsmError> {
        if !self.states.contains_key(name) {
            return Err(FsmError::StateNotFound(name.to_string()));
        }
        self.initial = Some(name.to_string());
        self.current = Some(name.to_string());
        Ok(())
    }

    pub fn final_states(&self) -> impl Iterator<Item = &str> {
        self.final_states.iter().map(String::as_str)
    }

    pub fn is_started(&self) -> bool {
        self.initial.is_some()
    }

    /// Name of the state that acts on the next tick.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn advance(&mut self, from: &str, event: Option<String>) {
        if self.final_states.contains(from) {
            debug!(fsm = %self.name, state = %from, "final state reached");
            self.current = None;
            return;
        }
        let next = self
            .transitions
            .get(from)
            .and_then(|edges| edges.get(&event))
            .cloned();
        match next {
            Some(next) => {
                debug!(fsm = %self.name, %from, to = %next, ?event, "transition");
                if let Some(state) = self.states.get_mut(&next) {
                    state.reset();
                }
                self.current = Some(next);
            }
            None => {
                debug!(fsm = %self.name, state = %from, ?event, "no transition, machine ends");
                self.current = None;
            }
        }
    }
}

impl Behaviour for FsmBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> anyhow::Result<()> {
        self.states.values_mut().try_for_each(|s| s.setup())
    }

    fn act(&mut self) -> anyhow::Result<()> {
        let Some(current) = self.current.clone() else {
            return Ok(());
        };
        let Some(state) = self.states.get_mut(&current) else {
            warn!(fsm = %self.name, state = %current, "current state is not registered, machine ends");
            self.current = None;
            return Ok(());
        };
        state.act()?;
        if !state.is_done() {
            return Ok(());
        }
        let event = state.event().map(str::to_string);
        self.advance(&current, event);
        Ok(())
    }

    fn teardown(&mut self) -> anyhow::Result<()> {
        self.states.values_mut().try_for_each(|s| s.teardown())
    }

    fn is_done(&self) -> bool {
        self.current.is_none()
    }

    fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

impl std::fmt::Debug for FsmBehaviour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmBehaviour")
            .field("name", &self.name)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn logging(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, event: Option<&'static str>) -> FnState {
        let log = Arc::clone(log);
        FnState::new(name, move || {
            log.lock().push(name);
            Ok(event.map(str::to_string))
        })
    }

    /// A state that takes `ticks` acts to finish.
    struct Slow {
        ticks: usize,
        seen: usize,
    }

    impl Behaviour for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn act(&mut self) -> anyhow::Result<()> {
            self.seen += 1;
            Ok(())
        }
        fn is_done(&self) -> bool {
            self.seen >= self.ticks
        }
    }

    impl State for Slow {
        fn event(&self) -> Option<&str> {
            Some("finished")
        }
    }

    #[test]
    fn runs_states_along_transitions_until_final() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fsm = FsmBehaviour::new("negotiation");
        fsm.register_state("start", logging("start", &log, Some("sent")), true).unwrap();
        fsm.register_state("wait", logging("wait", &log, Some("accepted")), false).unwrap();
        fsm.register_final_state("done", logging("done", &log, None)).unwrap();
        fsm.register_transition("start", "wait", Some("sent")).unwrap();
        fsm.register_transition("wait", "done", Some("accepted")).unwrap();

        assert!(fsm.is_started());
        assert_eq!(fsm.current(), Some("start"));
        while !fsm.is_done() {
            fsm.act().unwrap();
        }
        assert_eq!(*log.lock(), vec!["start", "wait", "done"]);
        assert_eq!(fsm.current(), None);
        fsm.act().unwrap();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn event_selects_branch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fsm = FsmBehaviour::new("check");
        fsm.register_state("check", logging("check", &log, Some("rejected")), true).unwrap();
        fsm.register_final_state("accept", logging("accept", &log, None)).unwrap();
        fsm.register_final_state("reject", logging("reject", &log, None)).unwrap();
        fsm.register_transition("check", "accept", Some("accepted")).unwrap();
        fsm.register_transition("check", "reject", Some("rejected")).unwrap();

        fsm.act().unwrap();
        assert_eq!(fsm.current(), Some("reject"));
        fsm.act().unwrap();
        assert!(fsm.is_done());
        assert_eq!(*log.lock(), vec!["check", "reject"]);
    }

    #[test]
    fn unfinished_state_stays_current() {
        let mut fsm = FsmBehaviour::new("slow");
        fsm.register_state("slow", Slow { ticks: 3, seen: 0 }, true).unwrap();
        fsm.register_final_state("end", FnState::new("end", || Ok(None))).unwrap();
        fsm.register_transition("slow", "end", Some("finished")).unwrap();

        fsm.act().unwrap();
        fsm.act().unwrap();
        assert_eq!(fsm.current(), Some("slow"));
        fsm.act().unwrap();
        assert_eq!(fsm.current(), Some("end"));
    }

    #[test]
    fn revisited_state_is_reset() {
        let rounds = Arc::new(Mutex::new(0));
        let r = Arc::clone(&rounds);
        let mut fsm = FsmBehaviour::new("retry");
        fsm.register_state(
            "attempt",
            FnState::new("attempt", move || {
                let mut rounds = r.lock();
                *rounds += 1;
                let event = if *rounds < 3 { "again" } else { "ok" };
                Ok(Some(event.to_string()))
            }),
            true,
        )
        .unwrap();
        fsm.register_final_state("end", FnState::new("end", || Ok(None))).unwrap();
        fsm.register_transition("attempt", "attempt", Some("again")).unwrap();
        fsm.register_transition("attempt", "end", Some("ok")).unwrap();

        for _ in 0..10 {
            fsm.act().unwrap();
        }
        assert!(fsm.is_done());
        assert_eq!(*rounds.lock(), 3);
    }

    #[test]
    fn missing_transition_ends_machine() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fsm = FsmBehaviour::new("lost");
        fsm.register_state("a", logging("a", &log, Some("unexpected")), true).unwrap();
        fsm.register_state("b", logging("b", &log, None), false).unwrap();
        fsm.register_transition("a", "b", Some("expected")).unwrap();

        fsm.act().unwrap();
        assert!(fsm.is_done());
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn failing_state_propagates_and_stays_current() {
        let mut fsm = FsmBehaviour::new("f");
        fsm.register_state("a", FnState::new("a", || anyhow::bail!("timeout")), true).unwrap();
        let err = fsm.act().unwrap_err();
        assert_eq!(err.to_string(), "timeout");
        assert_eq!(fsm.current(), Some("a"));
    }

    #[test]
    fn registration_errors() {
        let mut fsm = FsmBehaviour::new("f");
        assert!(fsm.is_done());
        assert!(!fsm.is_started());
        fsm.register_state("a", FnState::new("a", || Ok(None)), false).unwrap();
        assert_eq!(
            fsm.register_final_state("a", FnState::new("a", || Ok(None))),
            Err(FsmError::StateAlreadyRegistered("a".into()))
        );
        assert_eq!(fsm.set_initial_state("zz"), Err(FsmError::StateNotFound("zz".into())));
        fsm.set_initial_state("a").unwrap();
        assert_eq!(fsm.initial_state(), Some("a"));

        fsm.register_transition("a", "b", None).unwrap();
        assert!(matches!(
            fsm.register_transition("a", "c", None),
            Err(FsmError::TransitionAlreadyRegistered { .. })
        ));
        assert!(matches!(
            fsm.unregister_transition("a", "c", None),
            Err(FsmError::TransitionNotFound { .. })
        ));
        fsm.unregister_transition("a", "b", None).unwrap();
        fsm.register_transition("a", "c", None).unwrap();

        assert!(fsm.unregister_state("a").is_ok());
        assert_eq!(fsm.initial_state(), None);
        assert_eq!(fsm.states().count(), 0);
        assert!(matches!(fsm.unregister_state("a"), Err(FsmError::StateNotFound(_))));
    }
}
