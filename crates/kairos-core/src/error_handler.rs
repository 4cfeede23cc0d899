//! Dispatch-level fault counter and logger.
//!
//! Dispatch faults (unsupported protocol, undecodable payload, nobody to
//! handle the message) are bad input, not bugs: they are counted, logged at
//! warning level and the envelope is dropped. Nothing here ever fails.
//!
//! When configured with a reply sink, the handler also sends a
//! default-protocol `error` message back to the envelope's sender.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kairos_types::message::DEFAULT_PROTOCOL_ID;
use kairos_types::{Envelope, Message};
use serde_json::json;
use tracing::warn;

use crate::queue::EnvelopeSink;

/// Error codes carried by error replies.
pub mod codes {
    pub const UNSUPPORTED_PROTOCOL: &str = "unsupported_protocol";
    pub const DECODING_ERROR: &str = "decoding_error";
    pub const UNSUPPORTED_SKILL: &str = "unsupported_skill";
}

struct ReplyTarget {
    address: String,
    sink: Arc<dyn EnvelopeSink>,
}

/// Counts and logs dispatch faults.
#[derive(Default)]
pub struct ErrorHandler {
    unsupported_protocol_count: AtomicU64,
    no_active_handler_count: AtomicU64,
    decoding_error_count: AtomicU64,
    reply: Option<ReplyTarget>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also send error replies, signed with `address`, through `sink`.
    pub fn with_replies(address: impl Into<String>, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            reply: Some(ReplyTarget {
                address: address.into(),
                sink,
            }),
            ..Self::default()
        }
    }

    pub fn unsupported_protocol(&self, envelope: &Envelope) {
        self.unsupported_protocol_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            protocol = %envelope.protocol_specification_id,
            sender = %envelope.sender,
            "unsupported protocol, envelope dropped"
        );
        self.reply(
            envelope,
            codes::UNSUPPORTED_PROTOCOL,
            format!("Unsupported protocol: {}", envelope.protocol_specification_id),
            json!({ "protocol": envelope.protocol_specification_id }),
        );
    }

    pub fn decoding_error(&self, envelope: &Envelope, error: &anyhow::Error) {
        self.decoding_error_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            protocol = %envelope.protocol_specification_id,
            sender = %envelope.sender,
            error = %error,
            "decoding error, envelope dropped"
        );
        self.reply(
            envelope,
            codes::DECODING_ERROR,
            "Decoding error.".to_string(),
            json!({ "protocol": envelope.protocol_specification_id, "error": format!("{error:#}") }),
        );
    }

    pub fn no_active_handler(&self, envelope: &Envelope, reason: &str) {
        self.no_active_handler_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            protocol = %envelope.protocol_specification_id,
            sender = %envelope.sender,
            reason,
            "no active handler, envelope dropped"
        );
        self.reply(
            envelope,
            codes::UNSUPPORTED_SKILL,
            reason.to_string(),
            json!({
                "protocol": envelope.protocol_specification_id,
                "skill_id": envelope.skill_id.as_ref().map(ToString::to_string),
            }),
        );
    }

    pub fn unsupported_protocol_count(&self) -> u64 {
        self.unsupported_protocol_count.load(Ordering::Relaxed)
    }

    pub fn no_active_handler_count(&self) -> u64 {
        self.no_active_handler_count.load(Ordering::Relaxed)
    }

    pub fn decoding_error_count(&self) -> u64 {
        self.decoding_error_count.load(Ordering::Relaxed)
    }

    fn reply(&self, envelope: &Envelope, code: &str, description: String, data: serde_json::Value) {
        let Some(target) = &self.reply else {
            return;
        };
        // Never answer an error with an error.
        if envelope.protocol_specification_id == DEFAULT_PROTOCOL_ID || envelope.sender.is_empty() {
            return;
        }
        let message =
            Message::error(code, description, data).addressed(target.address.clone(), envelope.sender.clone());
        target.sink.send(Envelope::decoded(message));
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("unsupported_protocol_count", &self.unsupported_protocol_count())
            .field("no_active_handler_count", &self.no_active_handler_count())
            .field("decoding_error_count", &self.decoding_error_count())
            .field("replies", &self.reply.is_some())
            .finish()
    }
}
