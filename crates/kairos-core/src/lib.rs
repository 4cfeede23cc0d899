//! Execution core of a kairos agent.
//!
//! This crate schedules an agent's proactive work (behaviours), routes its
//! inbound envelopes to reactive work (handlers), and decides through the
//! exception policy how failures in that user code affect the running agent.
//! Shared data types live in `kairos-types`; protocol codecs and transports
//! are supplied by the embedder.

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod dispatcher;
pub mod error_handler;
pub mod filter;
pub mod periodic;
pub mod policy;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod skill;

pub use agent::{Agent, AgentBuilder, AgentContext, AgentError};
pub use agent_loop::{AgentLoop, AsyncAgentLoop, LoopError, LoopState, SyncAgentLoop};
pub use config::load_agent_config;
pub use dispatcher::EnvelopeDispatcher;
pub use error_handler::ErrorHandler;
pub use filter::Filter;
pub use periodic::PeriodicCaller;
pub use policy::{ExecutionControl, ExecutionError};
pub use protocol::{JsonProtocol, Protocol, ProtocolRegistry, StaticProtocolRegistry};
pub use queue::{BridgingQueue, EnvelopeSink, QueueError};
pub use registry::ComponentRegistry;
pub use skill::{
    Behaviour, CyclicBehaviour, FnHandler, FnState, FsmBehaviour, FsmError, Handler, OneShotBehaviour,
    SequenceBehaviour, Skill, SkillContext, State, TickerBehaviour,
};
