//! Error types for the chainingest pipeline.
//!
//! Only transport and configuration problems surface as errors. Malformed
//! lines, unconvertible fields, truncated streams and incomplete blocks are
//! expected input conditions: they are logged and counted, never returned.

use thiserror::Error;

/// Errors raised by a raw-byte source or a protocol event feed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source not found: {path}")]
    NotFound { path: String },

    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Source closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by a document-store sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Sink rejected record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Sink closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SinkError {
    /// Returns `true` if the failure is transient and the write may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors that can stop a stream loop or the engine.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Cursor store error: {0}")]
    CursorStore(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Stream '{stream}' task failed: {reason}")]
    Task { stream: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Returns `true` for source/sink/store unavailability. A stream loop
    /// waits and retries on these instead of stopping.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::Sink(_) | Self::CursorStore(_)
        )
    }
}
