//! The `Behaviour` trait.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A unit of proactive agent logic invoked every `tick_interval`.
///
/// `setup` runs once before periodic invocation starts, `teardown` once when
/// the agent shuts down. A `tick_interval` of zero means "act once".
pub trait Behaviour: Send {
    /// Name, unique within the owning skill.
    fn name(&self) -> &str;

    fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn act(&mut self) -> anyhow::Result<()>;

    fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A done behaviour is no longer part of the active set.
    fn is_done(&self) -> bool {
        false
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// First time the behaviour may act. `None` means immediately.
    fn start_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Behaviour shared between its registry entry and its periodic caller.
pub type SharedBehaviour = Arc<Mutex<Box<dyn Behaviour>>>;

pub(crate) fn share_behaviour(behaviour: Box<dyn Behaviour>) -> SharedBehaviour {
    Arc::new(Mutex::new(behaviour))
}
