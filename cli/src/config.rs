//! YAML configuration for `chainingest run`.
//!
//! ```yaml
//! log:
//!   level: info
//!   json: true
//! sink:
//!   type: elasticsearch
//!   url: http://localhost:9200
//!   ensure_index: true
//! cursor_dir: ./cursors
//! streams:
//!   - kind: lines
//!     name: redemption
//!     path: /var/log/stride/redemption.log
//!     profile: redemption_rate
//!   - kind: websocket
//!     name: rewards
//!     url: ws://localhost:26657/websocket
//!     contract: stride1...
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chainingest_core::{
    BlockProfile, DecoderConfig, FieldTypeTable, LineStreamOptions, ReconnectPolicy,
};
use chainingest_observability::LogConfig;
use chainingest_sources::query_for_contract;
use chainingest_storage::ElasticsearchConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Directory for per-stream checkpoints. In-memory checkpoints when unset.
    #[serde(default)]
    pub cursor_dir: Option<PathBuf>,
    /// Extra field types, merged over the built-in liquid-staking table.
    #[serde(default)]
    pub field_types: FieldTypeTable,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

impl IngestConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text).context("invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in '{}'", path.display()))
    }

    /// Rejects duplicate stream names, unknown profiles and websocket
    /// streams without a subscription.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.name()) {
                bail!("duplicate stream name '{}'", stream.name());
            }
            match stream {
                StreamConfig::Lines { profile, .. } => {
                    profile.resolve()?;
                }
                StreamConfig::Websocket { .. } => {
                    stream.subscription_query()?;
                }
                StreamConfig::TxLog { .. } => {}
            }
        }
        Ok(())
    }

    /// Built-in liquid-staking table with `field_types` applied on top.
    pub fn field_table(&self) -> FieldTypeTable {
        let mut table = FieldTypeTable::liquid_staking();
        table.extend(self.field_types.clone());
        table
    }
}

/// Where records go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Stdout,
    /// Keeps records in memory; only useful for dry runs.
    Memory,
    Elasticsearch {
        #[serde(flatten)]
        config: ElasticsearchConfig,
        /// Create the index with the field-type mapping on startup.
        #[serde(default)]
        ensure_index: bool,
    },
}

/// A block profile given by built-in name or spelled out inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileRef {
    Named(String),
    Inline(BlockProfile),
}

impl ProfileRef {
    pub fn resolve(&self) -> Result<BlockProfile> {
        match self {
            Self::Named(name) => BlockProfile::builtin(name).ok_or_else(|| {
                anyhow!(
                    "unknown profile '{}' (built-in: {})",
                    name,
                    BlockProfile::builtin_names().join(", ")
                )
            }),
            Self::Inline(profile) => Ok(profile.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamConfig {
    /// Key/value dump assembled into blocks.
    Lines {
        name: String,
        path: PathBuf,
        profile: ProfileRef,
        #[serde(flatten)]
        options: LineStreamOptions,
    },
    /// JSON log of a transaction listener, one message per line.
    TxLog {
        name: String,
        path: PathBuf,
        #[serde(flatten)]
        options: LineStreamOptions,
    },
    /// Live CometBFT websocket subscription.
    Websocket {
        name: String,
        url: String,
        #[serde(default)]
        contract: Option<String>,
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        reconnect: ReconnectPolicy,
    },
}

impl StreamConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Lines { name, .. } | Self::TxLog { name, .. } | Self::Websocket { name, .. } => {
                name
            }
        }
    }

    /// Subscription query of a websocket stream. An explicit `query` wins
    /// over `contract`.
    pub fn subscription_query(&self) -> Result<String> {
        match self {
            Self::Websocket {
                name,
                query,
                contract,
                ..
            } => match (query, contract) {
                (Some(q), _) => Ok(q.clone()),
                (None, Some(c)) => Ok(query_for_contract(c)),
                (None, None) => bail!("websocket stream '{name}' needs `contract` or `query`"),
            },
            other => bail!("stream '{}' is not a websocket stream", other.name()),
        }
    }
}
