//! Transaction results → protocol events.
//!
//! Two inputs share this code: the JSON log written by the websocket
//! listener (one winston-style JSON object per line) and live CometBFT
//! `subscribe` notifications. Both carry the same `result` object:
//!
//! ```json
//! { "data": { "value": { "TxResult": { "height": "42", "tx": "<base64>",
//!     "result": { "events": [ { "type": "...", "attributes": [ {"key": "..", "value": ".."} ] } ] } } } },
//!   "events": { "tx.hash": ["ABCD..."] } }
//! ```

use base64::prelude::*;
use chainingest_core::{
    DecoderConfig, EncodedAttribute, EventAttributeDecoder, LineHandler, LineOutcome,
    ProtocolEvent, RawFields,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace};

/// Log message that marks a line carrying a websocket notification.
pub const PARSED_MESSAGE_PREFIX: &str = "Parsed WebSocket Message:";

#[derive(Debug, Error)]
pub enum TxLogError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Extract the events of the transaction in a subscription `result` object.
///
/// Returns `None` when `result` carries no `TxResult` (e.g. the empty
/// subscription confirmation).
pub fn tx_events_from_result(result: &Value, timestamp: Option<i64>) -> Option<Vec<ProtocolEvent>> {
    let tx_result = result.get("data")?.get("value")?.get("TxResult")?;

    let tx_hash = tx_hash_of(result, tx_result);
    let block_height = tx_result.get("height").and_then(value_as_i64);

    let events = tx_result
        .get("result")
        .and_then(|r| r.get("events"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Some(
        events
            .iter()
            .filter_map(|ev| {
                let event_type = ev.get("type")?.as_str()?;
                let attributes = ev
                    .get("attributes")
                    .and_then(Value::as_array)
                    .map(|attrs| attrs.iter().filter_map(parse_attribute).collect())
                    .unwrap_or_default();
                Some(ProtocolEvent {
                    event_type: event_type.to_string(),
                    attributes,
                    tx_hash: tx_hash.clone(),
                    block_height,
                    timestamp,
                })
            })
            .collect(),
    )
}

fn parse_attribute(attr: &Value) -> Option<EncodedAttribute> {
    let key = attr.get("key")?.as_str()?;
    let value = attr.get("value").and_then(Value::as_str).unwrap_or_default();
    Some(EncodedAttribute::new(key, value))
}

/// `TxResult.hash`, else the `tx.hash` index tag, else SHA-256 of the raw tx.
fn tx_hash_of(result: &Value, tx_result: &Value) -> Option<String> {
    if let Some(hash) = tx_result.get("hash").and_then(Value::as_str) {
        return Some(hash.to_string());
    }
    if let Some(hash) = result
        .get("events")
        .and_then(|e| e.get("tx.hash"))
        .and_then(|h| h.get(0))
        .and_then(Value::as_str)
    {
        return Some(hash.to_string());
    }
    let tx = BASE64_STANDARD
        .decode(tx_result.get("tx")?.as_str()?)
        .ok()?;
    Some(hex::encode_upper(Sha256::digest(&tx)))
}

/// Accepts JSON numbers and decimal strings (CometBFT encodes int64 as
/// strings).
fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn log_timestamp(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp())
        }),
        _ => None,
    }
}

/// Parse one line of the listener's JSON log.
///
/// `Ok(None)` for log lines that are not parsed websocket messages or carry
/// no transaction.
pub fn parse_log_line(line: &str) -> Result<Option<Vec<ProtocolEvent>>, TxLogError> {
    let entry: Value = serde_json::from_str(line)?;
    let is_message = entry
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.starts_with(PARSED_MESSAGE_PREFIX));
    if !is_message {
        return Ok(None);
    }
    let result = entry.get("result").ok_or(TxLogError::MissingField("result"))?;
    let timestamp = entry.get("timestamp").and_then(log_timestamp);
    Ok(tx_events_from_result(result, timestamp))
}

// ─── Line handler ─────────────────────────────────────────────────────────────

/// Line handler for the listener's JSON log.
#[derive(Debug, Clone, Default)]
pub struct TxLogLineHandler {
    decoder: EventAttributeDecoder,
    skipped_attributes: usize,
}

impl TxLogLineHandler {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            decoder: EventAttributeDecoder::new(config),
            skipped_attributes: 0,
        }
    }
}

impl LineHandler for TxLogLineHandler {
    fn handle_line(&mut self, line: &str, out: &mut Vec<RawFields>) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Consumed;
        }
        match parse_log_line(line) {
            Ok(Some(events)) => {
                debug!(events = events.len(), "transaction events parsed");
                for event in &events {
                    let decoded = self.decoder.decode(event);
                    self.skipped_attributes += decoded.skipped_attributes;
                    out.extend(decoded.into_records());
                }
                LineOutcome::Consumed
            }
            Ok(None) => LineOutcome::Consumed,
            Err(e) => {
                trace!(error = %e, "unparseable log line");
                LineOutcome::Malformed
            }
        }
    }

    fn take_skipped_attributes(&mut self) -> usize {
        std::mem::take(&mut self.skipped_attributes)
    }
}
