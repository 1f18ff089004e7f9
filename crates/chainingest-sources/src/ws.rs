//! `CometWsFeed`: `EventFeed` over a CometBFT/Tendermint RPC websocket.
//!
//! Sends a JSON-RPC `subscribe` for transactions touching one contract and
//! yields the events of every transaction notification. Reconnection is the
//! event stream loop's job: it calls `subscribe()` again once the stream
//! ends.
//!
//! # Usage
//! ```no_run
//! use chainingest_sources::ws::CometWsFeed;
//!
//! let feed = CometWsFeed::for_contract(
//!     "ws://localhost:26457/websocket",
//!     "archway14hj2tavq8fpesdwxxcu44rty3hh90vhujrvcmstl4zr3txmfvw9sy85n2u",
//! );
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chainingest_core::{EventFeed, ProtocolEvent, ProtocolEventStream, SourceError};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::txlog::tx_events_from_result;

/// Subscription query for transactions emitting a `wasm` event of `contract`.
pub fn query_for_contract(contract: &str) -> String {
    format!("tm.event='Tx' AND wasm._contract_address='{contract}'")
}

pub struct CometWsFeed {
    name: String,
    url: String,
    query: String,
    connected: Arc<AtomicBool>,
}

impl CometWsFeed {
    pub fn new(url: impl Into<String>, query: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: url.clone(),
            url,
            query: query.into(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn for_contract(url: impl Into<String>, contract: &str) -> Self {
        Self::new(url, query_for_contract(contract))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventFeed for CometWsFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<ProtocolEventStream, SourceError> {
        info!(url = %self.url, "connecting to CometBFT websocket");
        let (ws, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            SourceError::ConnectionFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        self.connected.store(true, Ordering::Relaxed);

        let (mut write, read) = ws.split();
        let sub_msg = subscribe_request(&self.query);
        if let Err(e) = write.send(Message::Text(sub_msg.to_string())).await {
            self.connected.store(false, Ordering::Relaxed);
            return Err(SourceError::ConnectionFailed {
                url: self.url.clone(),
                reason: format!("subscribe failed: {e}"),
            });
        }
        info!(url = %self.url, query = %self.query, "subscribed");

        let (tx, rx) = mpsc::channel::<Result<ProtocolEvent, SourceError>>(512);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(run_ws_subscription(write, read, connected, tx));
        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(events))
    }
}

fn subscribe_request(query: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "subscribe",
        "id": "1",
        "params": { "query": query }
    })
}

// ─── Internal WebSocket loop ──────────────────────────────────────────────────

async fn run_ws_subscription<W, R>(
    mut write: W,
    mut read: R,
    connected: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<ProtocolEvent, SourceError>>,
) where
    W: futures::Sink<Message> + Unpin + Send + 'static,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
{
    loop {
        let msg_result = tokio::select! {
            _ = tx.closed() => {
                debug!("event receiver dropped, closing websocket");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => match msg {
                Some(m) => m,
                None => break,
            },
        };
        match msg_result {
            Err(e) => {
                warn!(error = %e, "websocket error");
                let _ = tx.send(Err(SourceError::Other(e.to_string()))).await;
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(bytes = text.len(), "ws message: {}", text.chars().take(120).collect::<String>());
                let received_at = chrono::Utc::now().timestamp();
                match parse_notification(&text, received_at) {
                    Some(Ok(events)) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                connected.store(false, Ordering::Relaxed);
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "subscription rejected");
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    None => {}
                }
            }
            Ok(Message::Close(_)) => {
                info!("websocket closed by server");
                break;
            }
            Ok(Message::Ping(data)) => {
                if write.send(Message::Pong(data)).await.is_err() {
                    warn!("failed to answer ping, dropping connection");
                    let _ = tx.send(Err(SourceError::Other("pong send failed".into()))).await;
                    break;
                }
            }
            Ok(_) => {}
        }
    }
    connected.store(false, Ordering::Relaxed);
    info!("websocket subscription loop ended");
}

// ─── Message parsing ─────────────────────────────────────────────────────────

/// Parse one websocket text frame.
///
/// `None` for frames without a transaction (subscription confirmation,
/// unparseable text). `Some(Err)` for JSON-RPC error responses.
fn parse_notification(text: &str, received_at: i64) -> Option<Result<Vec<ProtocolEvent>, SourceError>> {
    let v: Value = serde_json::from_str(text).ok()?;
    if let Some(err) = v.get("error") {
        return Some(Err(SourceError::Other(format!("JSON-RPC error: {err}"))));
    }
    let result = v.get("result")?;
    tx_events_from_result(result, Some(received_at)).map(Ok)
}
