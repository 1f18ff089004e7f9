//! Protocol event types as delivered by an event feed.

use serde::{Deserialize, Serialize};

/// One attribute of a protocol event, still in its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl EncodedAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A typed event emitted by a transaction (e.g. `wasm-liquid_stake`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Attributes in wire order.
    #[serde(default)]
    pub attributes: Vec<EncodedAttribute>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub block_height: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ProtocolEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            attributes: Vec::new(),
            tx_hash: None,
            block_height: None,
            timestamp: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(EncodedAttribute::new(key, value));
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_block_height(mut self, height: i64) -> Self {
        self.block_height = Some(height);
        self
    }

    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.timestamp = Some(ts);
        self
    }
}
