//! Turns completed posts into signed relay events.
//!
//! For each post: resolve the channel's identity, upload attachments in
//! order and append their public URLs to the text, sign, then fan out to the
//! relay pool. Pipeline failures are only ever logged; there is nobody to
//! report them to once ingestion has moved on.

use crate::telegram::TelegramError;
use crate::uploader::UploadError;
use async_trait::async_trait;
use crossnostr_identity::{sign_text_note, CredentialStore, SignedEvent};
use crossnostr_relay::RelayPool;
use crossnostr_types::{Attachment, CompletedPost};
use std::sync::Arc;

/// Attachment bytes resolved from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// File name as served by the source, including its extension.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Resolves attachment handles to bytes.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn fetch(&self, attachment: &Attachment) -> Result<FetchedFile, TelegramError>;
}

/// Stores bytes durably and returns a public URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// Delivers a signed event; returns the relays that accepted it.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn publish(&self, event: &SignedEvent) -> Vec<String>;

    /// True once nothing handed to [`publish`](Self::publish) can be delivered.
    fn is_shut_down(&self) -> bool {
        false
    }
}

#[async_trait]
impl Fanout for RelayPool {
    async fn publish(&self, event: &SignedEvent) -> Vec<String> {
        RelayPool::publish(self, event).await
    }

    fn is_shut_down(&self) -> bool {
        RelayPool::is_shut_down(self)
    }
}

/// Why a post was not published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The channel has no linked identity, or cross posting is off.
    NoIdentity,
    CredentialLookup(String),
    Signing(String),
    /// The relay pool shut down before the event could be sent.
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        event_id: String,
        public_key: String,
        /// Relays that acknowledged the event, possibly none.
        accepted: Vec<String>,
        skipped_attachments: usize,
    },
    Dropped(DropReason),
}

/// Publishes completed posts on behalf of their channels.
pub struct Publisher {
    credentials: Arc<dyn CredentialStore>,
    files: Arc<dyn FileSource>,
    uploader: Arc<dyn Uploader>,
    relays: Arc<dyn Fanout>,
}

impl Publisher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        files: Arc<dyn FileSource>,
        uploader: Arc<dyn Uploader>,
        relays: Arc<dyn Fanout>,
    ) -> Self {
        Self {
            credentials,
            files,
            uploader,
            relays,
        }
    }

    pub async fn publish(&self, post: CompletedPost) -> PublishOutcome {
        let channel_id = post.channel_id;

        // Looked up per post: a channel's key may be relinked between posts.
        let store = Arc::clone(&self.credentials);
        let lookup = tokio::task::spawn_blocking(move || store.get(channel_id)).await;
        let identity = match lookup {
            Ok(Ok(Some(identity))) => identity,
            Ok(Ok(None)) => {
                tracing::info!(%channel_id, "channel has no linked identity, dropping post");
                return PublishOutcome::Dropped(DropReason::NoIdentity);
            }
            Ok(Err(e)) => {
                tracing::error!(%channel_id, error = %e, "failed to load channel identity");
                return PublishOutcome::Dropped(DropReason::CredentialLookup(e.to_string()));
            }
            Err(e) => {
                tracing::error!(%channel_id, error = %e, "identity lookup task failed");
                return PublishOutcome::Dropped(DropReason::CredentialLookup(e.to_string()));
            }
        };

        let mut text = post.text;
        let mut skipped_attachments = 0;
        for attachment in &post.attachments {
            match self.host(attachment).await {
                Some(url) => {
                    text.push('\n');
                    text.push_str(&url);
                }
                None => skipped_attachments += 1,
            }
        }

        let created_at = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let event = match sign_text_note(&identity, text, created_at) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(%channel_id, error = %e, "failed to sign event");
                return PublishOutcome::Dropped(DropReason::Signing(e.to_string()));
            }
        };

        if self.relays.is_shut_down() {
            tracing::warn!(
                %channel_id,
                event_id = event.id(),
                "relay pool is shut down, dropping post"
            );
            return PublishOutcome::Dropped(DropReason::ShuttingDown);
        }
        let accepted = self.relays.publish(&event).await;
        tracing::info!(
            %channel_id,
            event_id = event.id(),
            event_pubkey = event.pubkey(),
            relays = ?accepted,
            skipped_attachments,
            "post published"
        );

        PublishOutcome::Published {
            event_id: event.id().to_string(),
            public_key: event.pubkey().to_string(),
            accepted,
            skipped_attachments,
        }
    }

    /// Fetches and uploads one attachment. Failures skip it.
    async fn host(&self, attachment: &Attachment) -> Option<String> {
        let file = match self.files.fetch(attachment).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    attachment = %attachment.name,
                    file_id = %attachment.file_id,
                    error = %e,
                    "failed to fetch attachment, skipping"
                );
                return None;
            }
        };

        match self.uploader.upload(&file.name, file.bytes).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(
                    attachment = %file.name,
                    error = %e,
                    "failed to upload attachment, skipping"
                );
                None
            }
        }
    }
}
