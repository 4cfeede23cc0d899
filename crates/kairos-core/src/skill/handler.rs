//! The `Handler` trait.

use std::sync::Arc;

use kairos_types::Message;
use parking_lot::Mutex;

/// A unit of reactive agent logic bound to one protocol.
pub trait Handler: Send {
    /// Name, unique within the owning skill.
    fn name(&self) -> &str;

    /// Specification id of the protocol this handler consumes.
    fn supported_protocol(&self) -> &str;

    fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle(&mut self, message: &Message) -> anyhow::Result<()>;

    fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type SharedHandler = Arc<Mutex<Box<dyn Handler>>>;

pub(crate) fn share_handler(handler: Box<dyn Handler>) -> SharedHandler {
    Arc::new(Mutex::new(handler))
}
