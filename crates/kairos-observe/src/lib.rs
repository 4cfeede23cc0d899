//! Observability setup for kairos agents.
//!
//! Agents only emit `tracing` events and spans; this crate decides where
//! they go.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
