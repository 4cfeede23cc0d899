//! Protocol registry seam.
//!
//! Real protocol codecs live outside the core. The dispatcher only needs to
//! resolve a protocol by specification id and ask it to decode bytes.
//! `StaticProtocolRegistry` and `JsonProtocol` cover embedders and tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use kairos_types::Message;
use parking_lot::RwLock;

/// A protocol able to decode raw envelope payloads.
pub trait Protocol: Send + Sync {
    /// Specification id, matched against `Envelope::protocol_specification_id`.
    fn specification_id(&self) -> &str;

    /// Decode a payload. May fail with any error.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Message>;
}

/// Resolves protocols by specification id.
pub trait ProtocolRegistry: Send + Sync {
    fn resolve_by_specification_id(&self, id: &str) -> Option<Arc<dyn Protocol>>;
}

/// Map-backed protocol registry.
#[derive(Default)]
pub struct StaticProtocolRegistry {
    protocols: RwLock<HashMap<String, Arc<dyn Protocol>>>,
}

impl StaticProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol, replacing any previous one with the same id.
    pub fn add(&self, protocol: Arc<dyn Protocol>) {
        self.protocols
            .write()
            .insert(protocol.specification_id().to_string(), protocol);
    }

    pub fn with(self, protocol: impl Protocol + 'static) -> Self {
        self.add(Arc::new(protocol));
        self
    }

    pub fn len(&self) -> usize {
        self.protocols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.read().is_empty()
    }
}

impl ProtocolRegistry for StaticProtocolRegistry {
    fn resolve_by_specification_id(&self, id: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.read().get(id).cloned()
    }
}

/// Protocol whose wire form is `{"performative": ..., "body": ...}` JSON.
#[derive(Debug, Clone)]
pub struct JsonProtocol {
    specification_id: String,
}

#[derive(serde::Deserialize)]
struct JsonWire {
    performative: String,
    #[serde(default)]
    body: serde_json::Value,
}

impl JsonProtocol {
    pub fn new(specification_id: impl Into<String>) -> Self {
        Self {
            specification_id: specification_id.into(),
        }
    }

    /// Encode a performative and body into this protocol's wire form.
    pub fn encode(performative: &str, body: &serde_json::Value) -> Vec<u8> {
        serde_json::json!({ "performative": performative, "body": body })
            .to_string()
            .into_bytes()
    }
}

impl Protocol for JsonProtocol {
    fn specification_id(&self) -> &str {
        &self.specification_id
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Message> {
        let wire: JsonWire = serde_json::from_slice(bytes)
            .with_context(|| format!("invalid {} payload", self.specification_id))?;
        Ok(Message::new(&self.specification_id, wire.performative, wire.body))
    }
}
