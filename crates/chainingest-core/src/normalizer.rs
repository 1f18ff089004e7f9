//! Record normalizer: coerces raw string fields into typed values.
//!
//! Conversion is best-effort per field: a value that is empty or does not
//! parse as its declared type is left out of the record, and the rest of
//! the record is still emitted. The first unparseable value of each field
//! is logged at `warn`; `Integer` fields hold `i64`, so base-unit amounts
//! above `i64::MAX` are among them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::record::{FieldValue, OutputRecord, RawFields};

/// Declared semantic type of a field.
///
/// Deserializes from the Elasticsearch mapping vocabulary as well
/// (`keyword`, `long`, `double`, `date`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "keyword")]
    String,
    /// Free text; converted like `String` but mapped for full-text search.
    Text,
    #[serde(alias = "long", alias = "int")]
    Integer,
    #[serde(alias = "double")]
    Float,
    #[serde(alias = "date", alias = "epoch_second")]
    EpochSeconds,
    #[serde(alias = "bool")]
    Boolean,
}

impl FieldType {
    /// Convert `raw` to this type. `None` for empty or unparseable input.
    pub fn convert(self, raw: &str) -> Option<FieldValue> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        match self {
            Self::String | Self::Text => Some(FieldValue::Str(raw.to_string())),
            Self::Integer => s.parse::<i64>().ok().map(FieldValue::Int),
            Self::Float => s
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(FieldValue::Float),
            Self::EpochSeconds => parse_epoch_seconds(s).map(FieldValue::EpochSeconds),
            Self::Boolean => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(FieldValue::Bool(true)),
                "false" | "0" | "no" => Some(FieldValue::Bool(false)),
                _ => None,
            },
        }
    }

    /// Elasticsearch mapping type used when provisioning an index.
    pub fn mapping_type(self) -> &'static str {
        match self {
            Self::String => "keyword",
            Self::Text => "text",
            Self::Integer => "long",
            Self::Float => "double",
            Self::EpochSeconds => "date",
            Self::Boolean => "boolean",
        }
    }
}

fn parse_epoch_seconds(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Field name → declared type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTypeTable {
    types: HashMap<String, FieldType>,
}

impl FieldTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.insert(field, ty);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, ty: FieldType) {
        self.types.insert(field.into(), ty);
    }

    /// Add every entry of `other`, overriding existing ones.
    pub fn extend(&mut self, other: FieldTypeTable) {
        self.types.extend(other.types);
    }

    pub fn get(&self, field: &str) -> Option<FieldType> {
        self.types.get(field).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.types.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Field types of the liquid-staking logs index.
    pub fn liquid_staking() -> Self {
        use FieldType::*;
        const FIELDS: &[(&str, FieldType)] = &[
            ("action", String),
            ("sender", String),
            ("owner", String),
            ("amount", String),
            ("liquid_staking_interval", Integer),
            ("arch_liquid_stake_interval", Integer),
            ("redemption_rate_query_interval", Integer),
            ("rewards_withdrawal_interval", Integer),
            ("redemption_interval_threshold", Integer),
            ("block_height", Integer),
            ("timestamp", EpochSeconds),
            ("rewards_address", String),
            ("reward_amount", Float),
            ("pending_deposit_record_amount", Float),
            ("completed_deposit_record_amount", Float),
            ("stake_amount", Float),
            ("redeem_tokens_amount", Float),
            ("liquidity_amount", Float),
            ("liquidity_tokens_amount", Float),
            ("updates", Text),
            ("contract_address", String),
            ("liquidity_provider_address", String),
            ("minimum_reward_amount", Float),
            ("maximum_reward_amount", Float),
            ("reward_address", String),
            ("processed_tasks", Text),
            ("deposit_record_id", Integer),
            ("deposit_record_status", String),
            ("total_liquid_stake", Float),
            ("stuarch_obtained", Float),
            ("redemption_rate", Float),
            ("time_since_latest_redemption", Integer),
            ("action_taken", String),
            ("total_rewards", Float),
            ("num_records", Integer),
            ("stake_proportion", Float),
            ("tokens_amount", Float),
            ("remaining_records", Integer),
            ("tx_hash", String),
            ("liquidity_address", String),
            ("status", String),
            ("method", String),
            ("address", String),
            ("redemption_ratio", Float),
            ("total_redeem_tokens", Integer),
            ("redeem_amount", Integer),
            ("epoch_number", Integer),
            ("host_zone_id", String),
            ("native_token_amount", Float),
            ("st_token_amount", Float),
            ("unbonding_time", Integer),
            ("user_redemption_records", String),
            ("bech32prefix", String),
            ("chain_id", String),
            ("connection_id", String),
            ("halted", Boolean),
            ("host_denom", String),
            ("ibc_denom", String),
            ("last_redemption_rate", Float),
            ("max_redemption_rate", Float),
            ("min_redemption_rate", Float),
            ("staked_bal", Integer),
            ("transfer_channel_id", String),
            ("unbonding_frequency", Integer),
            ("event_type", String),
        ];
        Self {
            types: FIELDS
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
        }
    }
}

/// Applies a [`FieldTypeTable`] to raw records.
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    table: FieldTypeTable,
    warned: Arc<Mutex<HashSet<String>>>,
}

impl RecordNormalizer {
    pub fn new(table: FieldTypeTable) -> Self {
        Self {
            table,
            warned: Arc::default(),
        }
    }

    pub fn table(&self) -> &FieldTypeTable {
        &self.table
    }

    /// Build the typed record for `raw`.
    ///
    /// Untyped fields pass through as strings. Typed fields that fail to
    /// convert are dropped; the number dropped is `raw.len() - record.len()`.
    pub fn normalize(&self, raw: &RawFields) -> OutputRecord {
        raw.iter()
            .filter_map(|(field, value)| {
                let converted = match self.table.get(field) {
                    Some(ty) => ty.convert(value),
                    None => Some(FieldValue::Str(value.clone())),
                };
                if converted.is_none() {
                    if !value.trim().is_empty() && self.first_failure(field) {
                        tracing::warn!(field = %field, value = %value, "dropping unconvertible field");
                    } else {
                        tracing::debug!(field = %field, value = %value, "dropping unconvertible field");
                    }
                }
                converted.map(|v| (field.clone(), v))
            })
            .collect()
    }

    /// `true` the first time `field` fails to convert.
    fn first_failure(&self, field: &str) -> bool {
        match self.warned.lock() {
            Ok(mut warned) => warned.insert(field.to_string()),
            Err(_) => false,
        }
    }
}

/// Free-function form of [`RecordNormalizer::normalize`].
pub fn normalize(raw: &RawFields, table: &FieldTypeTable) -> OutputRecord {
    RecordNormalizer::new(table.clone()).normalize(raw)
}
