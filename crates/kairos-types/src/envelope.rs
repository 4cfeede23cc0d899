//! Transport-level envelopes.
//!
//! An envelope carries addressing plus either raw bytes (to be decoded by
//! the protocol named in `protocol_specification_id`) or an already decoded
//! `Message`. Envelopes move stage to stage by value.

use serde::{Deserialize, Serialize};

use crate::ids::SkillId;
use crate::message::Message;

/// Envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Raw(Vec<u8>),
    Decoded(Message),
}

/// Addressing wrapper around a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: String,
    pub sender: String,
    pub protocol_specification_id: String,
    /// Destination skill, when the envelope targets one skill only.
    #[serde(default)]
    pub skill_id: Option<SkillId>,
    pub message: Payload,
}

impl Envelope {
    /// Envelope around undecoded bytes.
    pub fn raw(
        to: impl Into<String>,
        sender: impl Into<String>,
        protocol_specification_id: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            to: to.into(),
            sender: sender.into(),
            protocol_specification_id: protocol_specification_id.into(),
            skill_id: None,
            message: Payload::Raw(bytes.into()),
        }
    }

    /// Envelope around a decoded message, addressed from the message itself.
    pub fn decoded(message: Message) -> Self {
        Self {
            to: message.to.clone(),
            sender: message.sender.clone(),
            protocol_specification_id: message.protocol_id.clone(),
            skill_id: None,
            message: Payload::Decoded(message),
        }
    }

    /// Scope the envelope to a single destination skill.
    pub fn for_skill(mut self, skill_id: SkillId) -> Self {
        self.skill_id = Some(skill_id);
        self
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self.message, Payload::Decoded(_))
    }
}
