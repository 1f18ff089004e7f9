//! Event attribute decoder.
//!
//! Decodes the wire-encoded attributes of a [`ProtocolEvent`] and turns them
//! into raw records. Events of a multi-record type pack several records into
//! one flat attribute list; each record begins with the sentinel key:
//!
//! ```text
//! _contract_address=X  deposit_record_id=1  _contract_address=Y  deposit_record_id=2
//! └──────────── sub-record 1 ─────────────┘ └──────────── sub-record 2 ───────────┘
//! ```

use base64::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::config::{AttributeEncoding, DecoderConfig};
use crate::event::{EncodedAttribute, ProtocolEvent};
use crate::record::RawFields;

#[derive(Debug, Error)]
pub enum AttributeDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Decode a single attribute key or value.
pub fn decode_text(encoding: AttributeEncoding, raw: &str) -> Result<String, AttributeDecodeError> {
    match encoding {
        AttributeEncoding::Plain => Ok(raw.to_string()),
        AttributeEncoding::Base64 => Ok(String::from_utf8(BASE64_STANDARD.decode(raw)?)?),
    }
}

/// Output of [`EventAttributeDecoder::decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedEvent {
    /// One record per sentinel group (multi-record event types only).
    pub sub_records: Vec<RawFields>,
    /// The event-level record.
    pub event_record: RawFields,
    /// Attributes skipped because they failed to decode.
    pub skipped_attributes: usize,
}

impl DecodedEvent {
    /// Sub-records first, then the event record.
    pub fn into_records(self) -> Vec<RawFields> {
        let mut out = self.sub_records;
        out.push(self.event_record);
        out
    }
}

/// Stateless per-event decoder.
#[derive(Debug, Clone, Default)]
pub struct EventAttributeDecoder {
    config: DecoderConfig,
}

impl EventAttributeDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn decode(&self, event: &ProtocolEvent) -> DecodedEvent {
        let (pairs, skipped_attributes) = self.decode_attributes(event);
        let correlation = correlation_fields(event);

        let mut event_record = RawFields::new();
        event_record.insert("event_type".into(), event.event_type.clone());
        event_record.extend(correlation.clone());

        let is_multi = self
            .config
            .multi_record_event_types
            .iter()
            .any(|t| *t == event.event_type);

        if !is_multi {
            event_record.extend(pairs);
            return DecodedEvent {
                sub_records: Vec::new(),
                event_record,
                skipped_attributes,
            };
        }

        let groups = group_by_sentinel(pairs, &self.config.sentinel_key);
        let mut sub_records = Vec::with_capacity(groups.len());
        for group in groups {
            for (k, v) in &group {
                if !self.config.reserved_per_record_fields.contains(k) {
                    event_record.insert(k.clone(), v.clone());
                }
            }
            let mut record = correlation.clone();
            record.extend(group);
            sub_records.push(record);
        }

        DecodedEvent {
            sub_records,
            event_record,
            skipped_attributes,
        }
    }

    fn decode_attributes(&self, event: &ProtocolEvent) -> (Vec<(String, String)>, usize) {
        let mut skipped = 0;
        let pairs = event
            .attributes
            .iter()
            .filter_map(|EncodedAttribute { key, value }| {
                let decoded = decode_text(self.config.encoding, key)
                    .and_then(|k| Ok((k, decode_text(self.config.encoding, value)?)));
                match decoded {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        warn!(event_type = %event.event_type, key = %key, error = %e, "skipping undecodable attribute");
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();
        (pairs, skipped)
    }
}

/// Split `pairs` into groups, opening a new group at every sentinel key
/// unless the current group is still empty.
fn group_by_sentinel(pairs: Vec<(String, String)>, sentinel: &str) -> Vec<RawFields> {
    let mut groups = Vec::new();
    let mut current = RawFields::new();
    for (k, v) in pairs {
        if k == sentinel && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
        current.insert(k, v);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn correlation_fields(event: &ProtocolEvent) -> RawFields {
    let mut fields = RawFields::new();
    if let Some(tx) = &event.tx_hash {
        fields.insert("tx_hash".into(), tx.clone());
    }
    if let Some(h) = event.block_height {
        fields.insert("block_height".into(), h.to_string());
    }
    if let Some(ts) = event.timestamp {
        fields.insert("timestamp".into(), ts.to_string());
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        BASE64_STANDARD.encode(s)
    }

    fn rewards_event(pairs: &[(&str, &str)]) -> ProtocolEvent {
        pairs.iter().fold(
            ProtocolEvent::new("wasm-handle_liquid_staking_dapp_rewards")
                .with_tx_hash("ABC")
                .with_block_height(42),
            |ev, (k, v)| ev.with_attribute(b64(k), b64(v)),
        )
    }

    #[test]
    fn sentinel_groups_into_sub_records() {
        let ev = rewards_event(&[
            ("_contract_address", "X"),
            ("id", "1"),
            ("_contract_address", "Y"),
            ("id", "2"),
        ]);
        let out = EventAttributeDecoder::default().decode(&ev);
        assert_eq!(out.sub_records.len(), 2);
        assert_eq!(out.sub_records[0]["_contract_address"], "X");
        assert_eq!(out.sub_records[0]["id"], "1");
        assert_eq!(out.sub_records[1]["_contract_address"], "Y");
        assert_eq!(out.sub_records[1]["id"], "2");
        assert_eq!(out.sub_records[1]["tx_hash"], "ABC");
        assert_eq!(out.sub_records[1]["block_height"], "42");
    }

    #[test]
    fn event_record_excludes_reserved_fields_last_write_wins() {
        let ev = rewards_event(&[
            ("_contract_address", "X"),
            ("deposit_record_id", "1"),
            ("action", "a"),
            ("_contract_address", "Y"),
            ("deposit_record_id", "2"),
            ("action", "b"),
        ]);
        let out = EventAttributeDecoder::default().decode(&ev);
        let rec = &out.event_record;
        assert_eq!(rec["event_type"], "wasm-handle_liquid_staking_dapp_rewards");
        assert_eq!(rec["action"], "b");
        assert_eq!(rec["tx_hash"], "ABC");
        assert!(!rec.contains_key("deposit_record_id"));
        assert!(!rec.contains_key("_contract_address"));
    }

    #[test]
    fn leading_attributes_before_sentinel_form_first_group() {
        let ev = rewards_event(&[("action", "x"), ("_contract_address", "X"), ("id", "1")]);
        let out = EventAttributeDecoder::default().decode(&ev);
        assert_eq!(out.sub_records.len(), 2);
        assert_eq!(out.sub_records[0]["action"], "x");
    }

    #[test]
    fn other_event_types_merge_into_one_record() {
        let ev = ProtocolEvent::new("wasm-liquid_stake")
            .with_timestamp(1_700_000_000)
            .with_attribute(b64("amount"), b64("100"))
            .with_attribute(b64("timestamp"), b64("1700000001"));
        let out = EventAttributeDecoder::default().decode(&ev);
        assert!(out.sub_records.is_empty());
        assert_eq!(out.event_record["amount"], "100");
        assert_eq!(out.event_record["timestamp"], "1700000001");
        assert_eq!(out.into_records().len(), 1);
    }

    #[test]
    fn bad_base64_attribute_is_skipped() {
        let ev = ProtocolEvent::new("wasm-liquid_stake")
            .with_attribute("!!!not base64", b64("v"))
            .with_attribute(b64("sender"), b64("archway1abc"));
        let out = EventAttributeDecoder::default().decode(&ev);
        assert_eq!(out.skipped_attributes, 1);
        assert_eq!(out.event_record["sender"], "archway1abc");
    }

    #[test]
    fn plain_encoding_passes_text_through() {
        let cfg = DecoderConfig {
            encoding: AttributeEncoding::Plain,
            ..DecoderConfig::default()
        };
        let ev = ProtocolEvent::new("transfer").with_attribute("amount", "5uarch");
        let out = EventAttributeDecoder::new(cfg).decode(&ev);
        assert_eq!(out.event_record["amount"], "5uarch");
    }

    #[test]
    fn records_order_sub_records_first() {
        let ev = rewards_event(&[("_contract_address", "X")]);
        let records = EventAttributeDecoder::default().decode(&ev).into_records();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains_key("_contract_address"));
        assert!(records[1].contains_key("event_type"));
    }
}
