//! `EventFeed` trait: abstraction over protocol event transports.
//!
//! A feed yields events in arrival order. When the stream ends or errors,
//! the event stream loop calls `subscribe()` again after a backoff delay.

use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};

use crate::error::SourceError;
use crate::event::ProtocolEvent;

/// A stream of protocol events from one feed connection.
pub type ProtocolEventStream = Pin<Box<dyn Stream<Item = Result<ProtocolEvent, SourceError>> + Send>>;

#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Connect and start streaming events.
    async fn subscribe(&self) -> Result<ProtocolEventStream, SourceError>;
}

// ─── Channel feed ─────────────────────────────────────────────────────────────

/// Feed backed by an in-process channel. Subscribable once.
pub struct ChannelFeed {
    name: String,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ProtocolEvent>>>,
}

/// Sending half of a [`ChannelFeed`].
pub type ChannelFeedSender = mpsc::UnboundedSender<ProtocolEvent>;

impl ChannelFeed {
    pub fn new(name: impl Into<String>) -> (Self, ChannelFeedSender) {
        let (tx, rx) = mpsc::unbounded();
        let feed = Self {
            name: name.into(),
            rx: Mutex::new(Some(rx)),
        };
        (feed, tx)
    }
}

#[async_trait]
impl EventFeed for ChannelFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<ProtocolEventStream, SourceError> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| SourceError::Other("channel feed lock poisoned".into()))?
            .take()
            .ok_or(SourceError::Closed)?;
        Ok(Box::pin(rx.map(Ok)))
    }
}
