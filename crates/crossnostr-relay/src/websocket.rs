//! WebSocket transport for relay links.

use crate::connection::{PublishAck, RelayConnector, RelayLink};
use crate::error::RelayError;
use crate::message::{event_frame, RelayMessage};
use async_trait::async_trait;
use crossnostr_identity::SignedEvent;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Publishers waiting on each event id, tagged so each can withdraw its own.
type PendingAcks = Arc<Mutex<HashMap<String, Vec<(u64, oneshot::Sender<PublishAck>)>>>>;
type SharedSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Opens `ws://` and `wss://` relay connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayLink>, RelayError> {
        validate_url(url)?;
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| RelayError::WebSocket(e.to_string()))?;
        Ok(Arc::new(WsLink::start(url.to_string(), stream)))
    }
}

/// Accepts only absolute `ws`/`wss` URLs with a host.
pub fn validate_url(raw: &str) -> Result<(), RelayError> {
    let invalid = |reason: &str| RelayError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// A connected relay socket.
///
/// Writes go through a shared sink. A background reader routes `OK` frames
/// to every publisher waiting on that event id, answers pings, and fails
/// every waiting publisher once the socket ends.
pub struct WsLink {
    url: String,
    sink: SharedSink,
    pending: PendingAcks,
    next_waiter: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsLink {
    fn start(url: String, stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            url.clone(),
            stream,
            Arc::clone(&sink),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            url,
            sink,
            pending,
            next_waiter: AtomicU64::new(0),
            closed,
            reader: Mutex::new(Some(reader)),
        }
    }

    async fn send(&self, frame: Message) -> Result<(), RelayError> {
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| RelayError::WebSocket(e.to_string()))
    }
}

/// Withdraws one waiter when the publishing future finishes or is dropped by
/// a timeout. Other publishers of the same event keep theirs.
struct PendingSlot<'a> {
    pending: &'a PendingAcks,
    event_id: &'a str,
    waiter: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(waiters) = pending.get_mut(self.event_id) {
            waiters.retain(|(waiter, _)| *waiter != self.waiter);
            if waiters.is_empty() {
                pending.remove(self.event_id);
            }
        }
    }
}

#[async_trait]
impl RelayLink for WsLink {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &SignedEvent) -> Result<PublishAck, RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }

        let frame = event_frame(event)?;
        let (tx, rx) = oneshot::channel();
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.id().to_string())
            .or_default()
            .push((waiter, tx));
        let _slot = PendingSlot {
            pending: &self.pending,
            event_id: event.id(),
            waiter,
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }

        self.send(Message::Text(frame.into())).await?;
        tracing::debug!(relay = %self.url, event_id = event.id(), "event sent");

        rx.await.map_err(|_| RelayError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Err(e) = self.send(Message::Close(None)).await {
            tracing::debug!(relay = %self.url, error = %e, "close frame not sent");
        }
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    url: String,
    mut stream: SplitStream<WsStream>,
    sink: SharedSink,
    pending: PendingAcks,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(&url, text.as_str(), &pending),
            Ok(Message::Ping(data)) => {
                if let Err(e) = sink.lock().await.send(Message::Pong(data)).await {
                    tracing::debug!(relay = %url, error = %e, "pong not sent");
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!(relay = %url, "relay closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(relay = %url, error = %e, "relay socket error");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiting publisher with `Closed`.
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn handle_text(url: &str, text: &str, pending: &PendingAcks) {
    match RelayMessage::from_json(text) {
        Ok(RelayMessage::Ok {
            event_id,
            accepted,
            message,
        }) => {
            let waiters = pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&event_id);
            match waiters {
                Some(waiters) => {
                    let ack = PublishAck { accepted, message };
                    for (_, tx) in waiters {
                        let _ = tx.send(ack.clone());
                    }
                }
                None => tracing::debug!(relay = %url, %event_id, "ack for unknown event"),
            }
        }
        Ok(RelayMessage::Notice { message }) => {
            tracing::info!(relay = %url, %message, "relay notice");
        }
        Ok(other) => tracing::debug!(relay = %url, message = ?other, "ignoring relay message"),
        Err(e) => tracing::warn!(relay = %url, error = %e, "unparseable relay frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_websocket_urls() {
        assert!(validate_url("wss://relay.nostr.band/").is_ok());
        assert!(validate_url("ws://127.0.0.1:7777").is_ok());
    }

    #[test]
    fn rejects_other_urls() {
        for url in ["https://relay.example", "relay.example", "", "wss://"] {
            assert!(
                matches!(validate_url(url), Err(RelayError::InvalidUrl { .. })),
                "{url} should be rejected"
            );
        }
    }
}
