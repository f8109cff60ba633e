//! In-memory collaborators shared by the bridge integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use crossnostr_bridge::{
    Fanout, FetchedFile, FileSource, Messenger, OwnerVerifier, TelegramError, UploadError,
    Uploader,
};
use crossnostr_channels::{normalize_username, ChannelDirectory, ChannelError, TelegramChannel};
use crossnostr_identity::{CredentialStore, IdentityError, SignedEvent, SigningIdentity};
use crossnostr_relay::{PublishAck, RelayConnector, RelayError, RelayLink};
use crossnostr_types::{Attachment, ChannelId, ChannelUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const NSEC: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";

pub fn identity() -> SigningIdentity {
    crossnostr_identity::decode_nsec(NSEC).unwrap()
}

#[derive(Default)]
pub struct MemoryCredentials {
    linked: Mutex<HashMap<ChannelId, SigningIdentity>>,
}

impl MemoryCredentials {
    pub fn with(channel_id: ChannelId, identity: SigningIdentity) -> Self {
        let store = Self::default();
        store.linked.lock().unwrap().insert(channel_id, identity);
        store
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, channel_id: ChannelId) -> Result<Option<SigningIdentity>, IdentityError> {
        Ok(self.linked.lock().unwrap().get(&channel_id).cloned())
    }

    fn set(&self, channel_id: ChannelId, identity: &SigningIdentity) -> Result<(), IdentityError> {
        self.linked.lock().unwrap().insert(channel_id, identity.clone());
        Ok(())
    }
}

/// Serves `<file_id>.jpg`; ids starting with "missing" fail.
#[derive(Default)]
pub struct MemoryFiles {
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl FileSource for MemoryFiles {
    async fn fetch(&self, attachment: &Attachment) -> Result<FetchedFile, TelegramError> {
        self.fetched.lock().unwrap().push(attachment.file_id.clone());
        if attachment.file_id.starts_with("missing") {
            return Err(TelegramError::MissingFilePath(attachment.file_id.clone()));
        }
        Ok(FetchedFile {
            name: format!("{}.jpg", attachment.file_id),
            bytes: attachment.file_id.as_bytes().to_vec(),
        })
    }
}

/// Hosts files at `https://cdn.test/<name>`; names starting with "broken" fail.
#[derive(Default)]
pub struct MemoryUploader {
    pub uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl Uploader for MemoryUploader {
    async fn upload(&self, name: &str, _bytes: Vec<u8>) -> Result<String, UploadError> {
        if name.starts_with("broken") {
            return Err(UploadError::InvalidFileName(name.to_string()));
        }
        self.uploads.lock().unwrap().push(name.to_string());
        Ok(format!("https://cdn.test/{name}"))
    }
}

/// Accepts every event on the configured relays and records it.
pub struct RecordingFanout {
    pub relays: Vec<String>,
    pub events: Mutex<Vec<SignedEvent>>,
    pub calls: AtomicUsize,
}

impl RecordingFanout {
    pub fn new(relays: &[&str]) -> Self {
        Self {
            relays: relays.iter().map(|r| r.to_string()).collect(),
            events: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.content().to_string())
            .collect()
    }
}

#[async_trait]
impl Fanout for RecordingFanout {
    async fn publish(&self, event: &SignedEvent) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(event.clone());
        self.relays.clone()
    }
}

/// Connects to any URL; every link accepts every event.
pub struct AcceptingConnector;

#[async_trait]
impl RelayConnector for AcceptingConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayLink>, RelayError> {
        Ok(Arc::new(AcceptingLink(url.to_string())))
    }
}

struct AcceptingLink(String);

#[async_trait]
impl RelayLink for AcceptingLink {
    fn url(&self) -> &str {
        &self.0
    }

    async fn publish(&self, _event: &SignedEvent) -> Result<PublishAck, RelayError> {
        Ok(PublishAck {
            accepted: true,
            message: String::new(),
        })
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct MemoryDirectory {
    pub channels: Mutex<HashMap<String, ChannelUpdate>>,
}

impl ChannelDirectory for MemoryDirectory {
    fn upsert(&self, update: &ChannelUpdate) -> Result<(), ChannelError> {
        self.channels
            .lock()
            .unwrap()
            .insert(normalize_username(&update.username), update.clone());
        Ok(())
    }

    fn lookup(&self, username: &str) -> Result<Option<TelegramChannel>, ChannelError> {
        let channels = self.channels.lock().unwrap();
        Ok(channels
            .get(&normalize_username(username))
            .filter(|c| c.is_bot_added)
            .map(|c| TelegramChannel {
                channel_id: c.channel_id,
                name: c.title.clone(),
                username: normalize_username(&c.username),
                description: String::new(),
                photo_url: String::new(),
                is_bot_added: true,
                created_at: String::new(),
                updated_at: String::new(),
            }))
    }
}

/// Treats one user id as the creator of every channel.
pub struct SingleOwner(pub i64);

#[async_trait]
impl OwnerVerifier for SingleOwner {
    async fn is_channel_owner(
        &self,
        _channel_id: ChannelId,
        user_id: i64,
    ) -> Result<bool, TelegramError> {
        Ok(user_id == self.0)
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}
