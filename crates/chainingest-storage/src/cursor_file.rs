//! JSON-file cursor store.
//!
//! One `<stream>.json` file per stream in a directory. Saves go through a
//! temporary file and a rename so a crash never leaves a torn checkpoint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chainingest_core::{CursorStore, IngestError, StreamCheckpoint, StreamId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonFileCursorStore {
    dir: PathBuf,
}

impl JsonFileCursorStore {
    /// Use `dir` for checkpoint files, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| store_err(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the checkpoint of `stream_id`. Characters outside
    /// `[A-Za-z0-9._-]` are replaced so any path-like id maps to one file.
    pub fn path_for(&self, stream_id: &StreamId) -> PathBuf {
        let name: String = stream_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

fn store_err(path: &Path, e: impl std::fmt::Display) -> IngestError {
    IngestError::CursorStore(format!("{}: {e}", path.display()))
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn load(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, IngestError> {
        let path = self.path_for(stream_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err(&path, e)),
        };
        let cp = serde_json::from_slice(&bytes).map_err(|e| store_err(&path, e))?;
        Ok(Some(cp))
    }

    async fn save(&self, checkpoint: StreamCheckpoint) -> Result<(), IngestError> {
        let path = self.path_for(&checkpoint.stream_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| store_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| store_err(&path, e))?;
        debug!(stream = %checkpoint.stream_id, offset = checkpoint.offset, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), IngestError> {
        let path = self.path_for(stream_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn checkpoint(id: &str, offset: u64) -> StreamCheckpoint {
        StreamCheckpoint {
            stream_id: StreamId::new(id),
            offset,
            generation: 1,
            sticky: BTreeMap::from([("epoch_number".to_string(), "5".to_string())]),
            pending: None,
            skipping_line: false,
            updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCursorStore::open(dir.path().join("cursors")).await.unwrap();
        let id = StreamId::new("/var/log/unbonding.log");

        assert!(store.load(&id).await.unwrap().is_none());
        store.save(checkpoint(id.as_str(), 42)).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap(), Some(checkpoint(id.as_str(), 42)));

        store.save(checkpoint(id.as_str(), 99)).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().unwrap().offset, 99);

        store.delete(&id).await.unwrap();
        assert!(store.load(&id).await.unwrap().is_none());
        store.delete(&id).await.unwrap();
    }

    #[test]
    fn path_is_sanitized() {
        let store = JsonFileCursorStore {
            dir: PathBuf::from("/tmp/c"),
        };
        assert_eq!(
            store.path_for(&StreamId::new("/var/log/a b.log")),
            PathBuf::from("/tmp/c/_var_log_a_b.log.json")
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCursorStore::open(dir.path()).await.unwrap();
        let id = StreamId::new("x");
        tokio::fs::write(store.path_for(&id), b"{not json").await.unwrap();
        let err = store.load(&id).await.unwrap_err();
        assert!(err.is_transport());
    }
}
