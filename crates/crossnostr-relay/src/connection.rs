//! The seam between the pool and the network.

use crate::error::RelayError;
use async_trait::async_trait;
use crossnostr_identity::SignedEvent;
use std::sync::Arc;

/// A relay's answer to one published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
    pub message: String,
}

/// One live connection to a relay.
#[async_trait]
pub trait RelayLink: Send + Sync {
    fn url(&self) -> &str;

    /// Sends the event and waits for the relay's `OK`.
    ///
    /// A relay that answers `false` is not an error; transport failures and a
    /// connection that closes before answering are.
    async fn publish(&self, event: &SignedEvent) -> Result<PublishAck, RelayError>;

    async fn close(&self);
}

/// Opens links. The pool applies its own timeout around [`connect`](Self::connect).
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayLink>, RelayError>;
}
