//! Elasticsearch sink backed by `reqwest`.
//!
//! Features:
//! - One `POST {url}/{index}/_doc` per record
//! - Retry with exponential backoff for transport errors, 429 and 5xx
//! - Index provisioning from a [`FieldTypeTable`]

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chainingest_core::{FieldType, FieldTypeTable, OutputRecord, Sink, SinkError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

/// Configuration for [`ElasticsearchSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_url() -> String {
    "http://localhost:9200".into()
}

fn default_index() -> String {
    "smart-contract-liquid-staking-logs".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            index: default_index(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            username: None,
            password: None,
        }
    }
}

impl ElasticsearchConfig {
    /// Delay before the `attempt`-th retry (1-based), or `None` when retries
    /// are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_retries {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Some(Duration::from_millis(ms))
    }
}

/// Index mapping body for `table`: `{"mappings": {"properties": {...}}}`.
pub fn mapping_for(table: &FieldTypeTable) -> Value {
    let properties: BTreeMap<&str, Value> = table
        .iter()
        .map(|(field, ty)| {
            let mapping = match ty {
                FieldType::EpochSeconds => json!({ "type": "date", "format": "epoch_second" }),
                other => json!({ "type": other.mapping_type() }),
            };
            (field, mapping)
        })
        .collect();
    json!({ "mappings": { "properties": properties } })
}

/// Writes records to one Elasticsearch index.
pub struct ElasticsearchSink {
    config: ElasticsearchConfig,
    http: reqwest::Client,
    name: String,
}

impl ElasticsearchSink {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SinkError::Other(format!("failed to build HTTP client: {e}")))?;
        let name = format!("elasticsearch:{}", config.index);
        Ok(Self { config, http, name })
    }

    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn doc_url(&self) -> String {
        format!("{}/{}/_doc", self.base_url(), self.config.index)
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url(), self.config.index)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => req.basic_auth(user, self.config.password.as_ref()),
            None => req,
        }
    }

    async fn send_once(&self, body: &Value) -> Result<(), SinkError> {
        let resp = self
            .authed(self.http.post(self.doc_url()))
            .json(body)
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(())
    }

    /// Create the index with the mapping derived from `table` unless it
    /// already exists. Returns `true` if the index was created.
    pub async fn ensure_index(&self, table: &FieldTypeTable) -> Result<bool, SinkError> {
        let resp = self
            .authed(self.http.head(self.index_url()))
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        if resp.status().is_success() {
            info!(index = %self.config.index, "index already exists");
            return Ok(false);
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(SinkError::Rejected {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }

        let resp = self
            .authed(self.http.put(self.index_url()))
            .json(&mapping_for(table))
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        info!(index = %self.config.index, fields = table.len(), "index created");
        Ok(true)
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: OutputRecord) -> Result<(), SinkError> {
        let body = record.to_json();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&body).await {
                Ok(()) => {
                    debug!(index = %self.config.index, attempt, "document indexed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => match self.config.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            index = %self.config.index,
                            "retrying document write"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(attempt, error = %e, index = %self.config.index, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_uses_store_vocabulary() {
        let table = FieldTypeTable::new()
            .with("staked_bal", FieldType::Integer)
            .with("redemption_rate", FieldType::Float)
            .with("timestamp", FieldType::EpochSeconds)
            .with("updates", FieldType::Text)
            .with("halted", FieldType::Boolean)
            .with("tx_hash", FieldType::String);
        let m = mapping_for(&table);
        let props = &m["mappings"]["properties"];
        assert_eq!(props["staked_bal"]["type"], "long");
        assert_eq!(props["redemption_rate"]["type"], "double");
        assert_eq!(props["timestamp"]["type"], "date");
        assert_eq!(props["timestamp"]["format"], "epoch_second");
        assert_eq!(props["updates"]["type"], "text");
        assert_eq!(props["halted"]["type"], "boolean");
        assert_eq!(props["tx_hash"]["type"], "keyword");
    }

    #[test]
    fn retry_delays_double_and_stop() {
        let cfg = ElasticsearchConfig {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 250,
            ..ElasticsearchConfig::default()
        };
        assert_eq!(cfg.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(cfg.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(cfg.next_delay(3), Some(Duration::from_millis(250)));
        assert_eq!(cfg.next_delay(4), None);
    }

    #[test]
    fn urls_tolerate_trailing_slash() {
        let sink = ElasticsearchSink::new(ElasticsearchConfig {
            url: "http://es:9200/".into(),
            index: "logs".into(),
            ..ElasticsearchConfig::default()
        })
        .unwrap();
        assert_eq!(sink.doc_url(), "http://es:9200/logs/_doc");
        assert_eq!(sink.index_url(), "http://es:9200/logs");
        assert_eq!(sink.name(), "elasticsearch:logs");
    }

    #[tokio::test]
    async fn unreachable_store_is_retryable_failure() {
        let sink = ElasticsearchSink::new(ElasticsearchConfig {
            url: "http://127.0.0.1:1".into(),
            max_retries: 0,
            request_timeout_ms: 500,
            ..ElasticsearchConfig::default()
        })
        .unwrap();
        let err = sink.write(OutputRecord::default()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
