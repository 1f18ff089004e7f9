//! Per-stream configuration types and the built-in profiles.

use serde::{Deserialize, Serialize};

/// Where a stream without a stored checkpoint starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Process everything already in the file.
    #[default]
    Beginning,
    /// Skip existing content and follow new appends only.
    End,
}

/// How lines of a key/value stream are assembled into records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProfile {
    pub name: String,
    /// All of these must be present before a block may be emitted.
    pub required_fields: Vec<String>,
    /// Additional keys to keep in the block. Required and sticky fields
    /// are always tracked.
    #[serde(default)]
    pub tracked_fields: Vec<String>,
    /// Key that opens a new block, dropping any incomplete one.
    #[serde(default)]
    pub block_start_key: Option<String>,
    /// Key that closes a block and triggers emission. Without one, the
    /// block is emitted as soon as all required fields are present.
    #[serde(default)]
    pub block_end_key: Option<String>,
    /// Fields whose last value is carried into following blocks.
    #[serde(default)]
    pub sticky_fields: Vec<String>,
}

impl BlockProfile {
    /// `redemption_rate` + `staked_bal` pairs from the host-zone query dump.
    pub fn redemption_rate() -> Self {
        Self {
            name: "redemption_rate".into(),
            required_fields: vec!["redemption_rate".into(), "staked_bal".into()],
            tracked_fields: vec![],
            block_start_key: None,
            block_end_key: None,
            sticky_fields: vec![],
        }
    }

    /// `host_zone_unbondings` entries of the epoch unbonding record dump.
    pub fn host_zone_unbondings() -> Self {
        Self {
            name: "host_zone_unbondings".into(),
            required_fields: vec![
                "status".into(),
                "native_token_amount".into(),
                "st_token_amount".into(),
                "epoch_number".into(),
                "host_zone_id".into(),
            ],
            tracked_fields: vec![],
            block_start_key: Some("denom".into()),
            block_end_key: Some("status".into()),
            sticky_fields: vec!["epoch_number".into()],
        }
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "redemption_rate" => Some(Self::redemption_rate()),
            "host_zone_unbondings" => Some(Self::host_zone_unbondings()),
            _ => None,
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["redemption_rate", "host_zone_unbondings"]
    }
}

/// Wire encoding of event attribute keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeEncoding {
    /// Standard base64 (Tendermint ≤ 0.34).
    #[default]
    Base64,
    /// Plain UTF-8 (CometBFT ≥ 0.37).
    Plain,
}

/// Configuration of the event attribute decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Event types whose attributes hold several records.
    #[serde(default = "default_multi_record_types")]
    pub multi_record_event_types: Vec<String>,
    /// Attribute key that starts each record of a multi-record event.
    #[serde(default = "default_sentinel_key")]
    pub sentinel_key: String,
    /// Keys that belong to the individual records and are left out of the
    /// event-level record.
    #[serde(default = "default_reserved_fields")]
    pub reserved_per_record_fields: Vec<String>,
    #[serde(default)]
    pub encoding: AttributeEncoding,
}

fn default_multi_record_types() -> Vec<String> {
    vec!["wasm-handle_liquid_staking_dapp_rewards".into()]
}

fn default_sentinel_key() -> String {
    "_contract_address".into()
}

fn default_reserved_fields() -> Vec<String> {
    [
        "deposit_record_id",
        "deposit_record_status",
        "pending_deposit_record_amount",
        "completed_deposit_record_amount",
        "reward_address",
        "contract_address",
        "timestamp",
        "block_height",
        "_contract_address",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            multi_record_event_types: default_multi_record_types(),
            sentinel_key: default_sentinel_key(),
            reserved_per_record_fields: default_reserved_fields(),
            encoding: AttributeEncoding::default(),
        }
    }
}

/// Runtime options of a line-oriented stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStreamOptions {
    #[serde(default)]
    pub start_from: StartPosition,
    /// Growth polling interval (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A fragment longer than this without a terminator is skipped.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Field stamped with the emission time when a block lacks it.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_line_bytes() -> usize {
    1 << 20
}

fn default_timestamp_field() -> Option<String> {
    Some("timestamp".into())
}

impl Default for LineStreamOptions {
    fn default() -> Self {
        Self {
            start_from: StartPosition::Beginning,
            poll_interval_ms: default_poll_interval_ms(),
            max_line_bytes: default_max_line_bytes(),
            timestamp_field: default_timestamp_field(),
        }
    }
}

/// Reconnect policy of an event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_ms: u64,
}

fn default_reconnect_initial_ms() -> u64 {
    5_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_ms: default_reconnect_initial_ms(),
            max_ms: default_reconnect_max_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to
    /// `max_ms`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_ms.saturating_mul(1u64 << exp).min(self.max_ms)
    }
}
