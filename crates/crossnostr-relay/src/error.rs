use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to a single relay.
///
/// None of these escape [`RelayPool::publish`](crate::RelayPool::publish);
/// they are logged and turned into reconnects.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
