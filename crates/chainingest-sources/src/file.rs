//! `FileSource`: a log file on local disk, polled for growth.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chainingest_core::{ByteSource, ReadWindow, SourceError};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Polls a file's size every `poll_interval`. Rotation shows up as the file
/// shrinking, which the offset tracker turns into a new generation.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(1_000),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map_io(&self, e: std::io::Error) -> SourceError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound {
                path: self.path.display().to_string(),
            }
        } else {
            SourceError::Io(e)
        }
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn len(&self) -> Result<u64, SourceError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.map_io(e))?;
        Ok(meta.len())
    }

    async fn read_range(&self, window: ReadWindow) -> Result<Vec<u8>, SourceError> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| self.map_io(e))?;
        file.seek(SeekFrom::Start(window.start)).await?;
        let mut buf = Vec::with_capacity(window.len() as usize);
        file.take(window.len()).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn changed(&self) {
        tokio::time::sleep(self.poll_interval).await;
    }
}
