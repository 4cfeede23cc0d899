//! Decoded protocol messages.
//!
//! A `Message` is what protocol decoders produce and what handlers consume.
//! The protocol-specific part is the `performative` plus a JSON `body`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Specification id of the built-in protocol used for error replies.
pub const DEFAULT_PROTOCOL_ID: &str = "kairos/default:1.0.0";

/// Performative of an error reply on the default protocol.
pub const ERROR_PERFORMATIVE: &str = "error";

/// A decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Protocol specification id this message belongs to.
    pub protocol_id: String,
    pub performative: String,
    /// Sender address. Stamped from the envelope on dispatch.
    #[serde(default)]
    pub sender: String,
    /// Recipient address (or skill id for internal messages).
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message with empty addressing.
    pub fn new(
        protocol_id: impl Into<String>,
        performative: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            protocol_id: protocol_id.into(),
            performative: performative.into(),
            sender: String::new(),
            to: String::new(),
            body,
            timestamp: Utc::now(),
        }
    }

    /// Set the sender and recipient.
    pub fn addressed(mut self, sender: impl Into<String>, to: impl Into<String>) -> Self {
        self.sender = sender.into();
        self.to = to.into();
        self
    }

    pub fn has_sender(&self) -> bool {
        !self.sender.is_empty()
    }

    pub fn has_to(&self) -> bool {
        !self.to.is_empty()
    }

    /// Build a default-protocol error message.
    pub fn error(code: &str, description: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(
            DEFAULT_PROTOCOL_ID,
            ERROR_PERFORMATIVE,
            serde_json::json!({
                "error_code": code,
                "error_msg": description.into(),
                "error_data": data,
            }),
        )
    }
}
