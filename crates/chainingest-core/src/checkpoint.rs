//! Stream checkpoints: persist each stream's cursor together with the
//! parse state that belongs to the committed offset (sticky values, the
//! half-assembled block, an oversized line still being skipped), so a
//! restarted stream resumes exactly where it stopped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::{StreamCursor, StreamId};
use crate::error::IngestError;
use crate::record::RawFields;

/// A persisted checkpoint for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCheckpoint {
    pub stream_id: StreamId,
    /// Committed byte offset.
    pub offset: u64,
    /// Truncation generation of `offset`.
    pub generation: u64,
    /// Last seen value of each sticky field.
    #[serde(default)]
    pub sticky: BTreeMap<String, String>,
    /// Block accumulated from lines before `offset` but not yet complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<RawFields>,
    /// `offset` lies inside an oversized line whose tail must be skipped.
    #[serde(default)]
    pub skipping_line: bool,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl StreamCheckpoint {
    pub fn new(cursor: &StreamCursor, sticky: BTreeMap<String, String>) -> Self {
        Self {
            stream_id: cursor.stream_id.clone(),
            offset: cursor.last_offset,
            generation: cursor.generation,
            sticky,
            pending: None,
            skipping_line: false,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_pending(mut self, pending: Option<RawFields>) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_skipping_line(mut self, skipping: bool) -> Self {
        self.skipping_line = skipping;
        self
    }

    pub fn cursor(&self) -> StreamCursor {
        StreamCursor {
            stream_id: self.stream_id.clone(),
            last_offset: self.offset,
            generation: self.generation,
        }
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implementations: `MemoryCursorStore` (here) and `JsonFileCursorStore`
/// (chainingest-storage).
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, IngestError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: StreamCheckpoint) -> Result<(), IngestError>;

    /// Delete a checkpoint (e.g. when resetting a stream).
    async fn delete(&self, stream_id: &StreamId) -> Result<(), IngestError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory cursor store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<StreamId, StreamCheckpoint>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data<R>(
        &self,
        f: impl FnOnce(&mut HashMap<StreamId, StreamCheckpoint>) -> R,
    ) -> Result<R, IngestError> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| IngestError::CursorStore("memory store lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, IngestError> {
        self.with_data(|data| data.get(stream_id).cloned())
    }

    async fn save(&self, checkpoint: StreamCheckpoint) -> Result<(), IngestError> {
        self.with_data(|data| {
            data.insert(checkpoint.stream_id.clone(), checkpoint);
        })
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), IngestError> {
        self.with_data(|data| {
            data.remove(stream_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCursorStore::new();
        let id = StreamId::new("unbonding.log");
        assert!(store.load(&id).await.unwrap().is_none());

        let mut cursor = StreamCursor::new(id.clone());
        cursor.last_offset = 512;
        cursor.generation = 2;
        let sticky = BTreeMap::from([("epoch_number".to_string(), "5".to_string())]);
        store.save(StreamCheckpoint::new(&cursor, sticky)).await.unwrap();

        let cp = store.load(&id).await.unwrap().unwrap();
        assert_eq!(cp.cursor(), cursor);
        assert_eq!(cp.sticky["epoch_number"], "5");

        store.delete(&id).await.unwrap();
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[test]
    fn checkpoint_json_shape() {
        let cp = StreamCheckpoint {
            stream_id: StreamId::new("a"),
            offset: 10,
            generation: 0,
            sticky: BTreeMap::new(),
            pending: None,
            skipping_line: false,
            updated_at: 1,
        };
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["stream_id"], "a");
        assert_eq!(json["offset"], 10);
        assert!(json.get("pending").is_none());
    }

    #[test]
    fn pending_block_survives_json() {
        let mut cursor = StreamCursor::new(StreamId::new("u"));
        cursor.last_offset = 64;
        let pending: RawFields = [("host_zone_id", "a"), ("epoch_number", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cp = StreamCheckpoint::new(&cursor, BTreeMap::new()).with_pending(Some(pending.clone()));
        let back: StreamCheckpoint = serde_json::from_str(&serde_json::to_string(&cp).unwrap()).unwrap();
        assert_eq!(back.pending, Some(pending));
        assert!(!back.skipping_line);
    }

    #[test]
    fn older_checkpoints_load_without_parse_state() {
        let cp: StreamCheckpoint = serde_json::from_str(
            r#"{"stream_id":"a","offset":3,"generation":0,"sticky":{},"updated_at":1}"#,
        )
        .unwrap();
        assert!(cp.pending.is_none());
        assert!(!cp.skipping_line);
    }
}
