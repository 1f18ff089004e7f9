//! `IngestEngine`: runs every configured stream as its own Tokio task and
//! stops them together.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::emitter::{Emitter, Sink};
use crate::error::IngestError;
use crate::metrics::{IngestMetrics, StreamMetrics};
use crate::stream::{EventStream, LineStream};

/// The top-level engine.
pub struct IngestEngine {
    metrics: Arc<IngestMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<(String, JoinHandle<Result<(), IngestError>>)>,
}

impl Default for IngestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestEngine {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            metrics: Arc::new(IngestMetrics::new()),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        }
    }

    /// Build an emitter for `sink` that reports into this engine's metrics.
    pub fn emitter(&self, sink: Arc<dyn Sink>) -> Emitter {
        Emitter::new(sink, self.metrics.clone())
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.metrics.snapshot()
    }

    /// Shared counters, readable after the engine has been shut down.
    pub fn metrics_handle(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    /// Number of spawned streams (finished ones included).
    pub fn stream_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn spawn_line_stream(&mut self, stream: LineStream) {
        let name = stream.id().to_string();
        info!(stream = %name, "spawning line stream");
        let handle = tokio::spawn(stream.run(self.shutdown_rx.clone()));
        self.tasks.push((name, handle));
    }

    pub fn spawn_event_stream(&mut self, name: impl Into<String>, stream: EventStream) {
        let name = name.into();
        info!(stream = %name, "spawning event stream");
        let handle = tokio::spawn(stream.run(self.shutdown_rx.clone()));
        self.tasks.push((name, handle));
    }

    /// Signal every stream to stop at its next wait point.
    pub fn request_shutdown(&self) {
        // Receivers live in the stream tasks; a send error only means they
        // all finished already.
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait until every stream has finished on its own.
    pub async fn join(self) -> Result<(), IngestError> {
        let mut first_err = None;
        for (name, handle) in self.tasks {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(IngestError::Task {
                    stream: name.clone(),
                    reason: e.to_string(),
                }),
            };
            if let Err(e) = result {
                error!(stream = %name, error = %e, "stream failed");
                first_err.get_or_insert(e);
            } else {
                info!(stream = %name, "stream finished");
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Request shutdown and wait for every stream to stop.
    pub async fn shutdown(self) -> Result<(), IngestError> {
        info!(streams = self.tasks.len(), "shutting down ingest engine");
        self.request_shutdown();
        self.join().await
    }
}
