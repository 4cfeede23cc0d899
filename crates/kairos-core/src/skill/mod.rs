//! Skill extensibility surface consumed by the execution core.
//!
//! - `behaviour` -- the `Behaviour` trait for proactive, periodic logic
//! - `handler` -- the `Handler` trait for reactive, per-protocol logic
//! - `context` -- `SkillContext` (active flag + runtime publication queues) and `Skill`
//! - `behaviours` -- ready-made behaviour kinds and a closure-backed handler
//! - `fsm` -- `FsmBehaviour` and its `State` trait

pub mod behaviour;
pub mod behaviours;
pub mod context;
pub mod fsm;
pub mod handler;

pub use behaviour::{Behaviour, SharedBehaviour};
pub use behaviours::{CyclicBehaviour, FnHandler, OneShotBehaviour, SequenceBehaviour, TickerBehaviour};
pub use context::{Skill, SkillContext};
pub use fsm::{FnState, FsmBehaviour, FsmError, State};
pub use handler::{Handler, SharedHandler};
