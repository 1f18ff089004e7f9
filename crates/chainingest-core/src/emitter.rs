//! Emitter: the only component that talks to the sink.
//!
//! Sink failures are logged and counted; the record is dropped and the
//! stream carries on.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::SinkError;
use crate::metrics::{Counter, IngestMetrics};
use crate::record::OutputRecord;

/// Destination document store.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "sink"
    }

    /// Write one record. Returns once the store acknowledged it.
    async fn write(&self, record: OutputRecord) -> Result<(), SinkError>;
}

/// Cloneable handle shared by every stream task.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn Sink>,
    metrics: Arc<IngestMetrics>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn Sink>, metrics: Arc<IngestMetrics>) -> Self {
        Self { sink, metrics }
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    /// Hand `record` to the sink. Returns `false` if the sink failed.
    pub async fn emit(&self, record: OutputRecord) -> bool {
        let fields = record.len();
        match self.sink.write(record).await {
            Ok(()) => {
                self.metrics.incr(Counter::RecordsEmitted);
                debug!(sink = self.sink.name(), fields, "record emitted");
                true
            }
            Err(e) => {
                self.metrics.incr(Counter::SinkErrors);
                error!(sink = self.sink.name(), error = %e, "sink write failed, record dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("sink", &self.sink.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use std::sync::Mutex;

    struct FlakySink {
        fail: bool,
        written: Mutex<Vec<OutputRecord>>,
    }

    #[async_trait]
    impl Sink for FlakySink {
        async fn write(&self, record: OutputRecord) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Http("connection refused".into()));
            }
            self.written.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn record() -> OutputRecord {
        [("status".to_string(), FieldValue::Str("ok".into()))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn success_is_counted() {
        let sink = Arc::new(FlakySink { fail: false, written: Mutex::new(vec![]) });
        let emitter = Emitter::new(sink.clone(), Arc::new(IngestMetrics::new()));
        assert!(emitter.emit(record()).await);
        assert_eq!(sink.written.lock().unwrap().len(), 1);
        assert_eq!(emitter.metrics().snapshot().records_emitted, 1);
    }

    #[tokio::test]
    async fn failure_drops_record_and_counts() {
        let sink = Arc::new(FlakySink { fail: true, written: Mutex::new(vec![]) });
        let emitter = Emitter::new(sink, Arc::new(IngestMetrics::new()));
        assert!(!emitter.emit(record()).await);
        let m = emitter.metrics().snapshot();
        assert_eq!(m.sink_errors, 1);
        assert_eq!(m.records_emitted, 0);
    }
}
