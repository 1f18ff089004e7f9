//! `ByteSource` trait: abstraction over growing, possibly rotated byte
//! streams (log files, in-memory buffers).

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::cursor::ReadWindow;
use crate::error::SourceError;

/// A growing byte stream read by a line stream loop.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Human-readable description (path, URL) for logs.
    fn describe(&self) -> String;

    /// Current size in bytes.
    async fn len(&self) -> Result<u64, SourceError>;

    /// Read the bytes in `window`. May return fewer bytes if the stream
    /// shrank in the meantime.
    async fn read_range(&self, window: ReadWindow) -> Result<Vec<u8>, SourceError>;

    /// Wait until the source may have changed (poll interval or push
    /// notification).
    async fn changed(&self);
}

// ─── In-memory source ─────────────────────────────────────────────────────────

/// Append/truncate buffer, mainly for tests and piping.
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    data: Mutex<Vec<u8>>,
    notify: Notify,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<u8>>, SourceError> {
        self.data
            .lock()
            .map_err(|_| SourceError::Other(format!("{}: buffer lock poisoned", self.name)))
    }

    /// Append bytes and wake the reader.
    pub fn append(&self, bytes: impl AsRef<[u8]>) -> Result<(), SourceError> {
        self.lock()?.extend_from_slice(bytes.as_ref());
        self.notify.notify_one();
        Ok(())
    }

    /// Shrink the buffer to `len` bytes, simulating truncation/rotation.
    pub fn truncate(&self, len: usize) -> Result<(), SourceError> {
        self.lock()?.truncate(len);
        self.notify.notify_one();
        Ok(())
    }

    /// Replace the whole content, simulating rotation to a new file.
    pub fn replace(&self, bytes: impl Into<Vec<u8>>) -> Result<(), SourceError> {
        *self.lock()? = bytes.into();
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn len(&self) -> Result<u64, SourceError> {
        Ok(self.lock()?.len() as u64)
    }

    async fn read_range(&self, window: ReadWindow) -> Result<Vec<u8>, SourceError> {
        let data = self.lock()?;
        let len = data.len();
        let end = (window.end as usize).min(len);
        let start = (window.start as usize).min(end);
        Ok(data[start..end].to_vec())
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_read() {
        let src = MemorySource::new("t");
        src.append(b"hello\nworld\n").unwrap();
        assert_eq!(src.len().await.unwrap(), 12);
        let bytes = src.read_range(ReadWindow { start: 6, end: 12 }).await.unwrap();
        assert_eq!(bytes, b"world\n");
    }

    #[tokio::test]
    async fn read_past_end_is_clamped() {
        let src = MemorySource::new("t");
        src.append(b"abc").unwrap();
        let bytes = src.read_range(ReadWindow { start: 1, end: 100 }).await.unwrap();
        assert_eq!(bytes, b"bc");
    }

    #[tokio::test]
    async fn append_wakes_waiter() {
        let src = std::sync::Arc::new(MemorySource::new("t"));
        let waiter = {
            let src = src.clone();
            tokio::spawn(async move { src.changed().await })
        };
        src.append(b"x").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
