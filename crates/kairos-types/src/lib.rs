//! Shared domain types for the kairos agent execution core.
//!
//! This crate contains the data that flows between the scheduler, the
//! dispatcher and skills: envelopes, decoded messages, identifiers, the
//! loop state machine, the exception policy and the agent configuration.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;
pub mod policy;
pub mod state;

pub use config::{AgentConfig, LoopMode};
pub use envelope::{Envelope, Payload};
pub use error::{ConfigError, RegistryError};
pub use ids::{ComponentId, SkillId};
pub use message::Message;
pub use policy::ExceptionPolicy;
pub use state::AgentLoopState;
