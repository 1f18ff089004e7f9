//! In-memory sink.
//!
//! Keeps every record in RAM. Useful for tests and dry runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chainingest_core::{OutputRecord, Sink, SinkError};

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OutputRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record written so far.
    pub fn records(&self) -> Vec<OutputRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Remove and return every record written so far.
    pub fn drain(&self) -> Vec<OutputRecord> {
        self.records
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records whose `tx_hash` equals `tx_hash`.
    pub fn by_tx_hash(&self, tx_hash: &str) -> Vec<OutputRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.tx_hash() == Some(tx_hash))
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, record: OutputRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Other("memory sink lock poisoned".into()))?
            .push(record);
        Ok(())
    }
}
