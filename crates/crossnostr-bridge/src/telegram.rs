//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates`, classifies each update into a [`SourceEvent`]
//! and feeds them, in order, into a bounded queue drained by the ingestion
//! loop. The same client answers commands, checks channel ownership and
//! downloads attachment bytes for the publisher.

use crate::commands::{Messenger, OwnerVerifier};
use crate::publisher::{FetchedFile, FileSource};
use async_trait::async_trait;
use crossnostr_types::{
    Attachment, ChannelId, ChannelUpdate, Command, GroupKey, PostUpdate, SourceEvent,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ALLOWED_UPDATES: [&str; 3] = ["channel_post", "message", "my_chat_member"];

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("bot api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bot api error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("bot api returned no result for {0}")]
    MissingResult(&'static str),

    #[error("file {0} has no download path")]
    MissingFilePath(String),
}

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub channel_post: Option<Message>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub my_chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    /// Sizes of one photo, smallest first.
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Video {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMember {
    pub status: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

/// Maps an update to the event the bridge cares about, if any.
pub fn classify(update: &Update) -> Option<SourceEvent> {
    if let Some(post) = &update.channel_post {
        return Some(SourceEvent::Post(post_update(post)));
    }

    if let Some(message) = &update.message {
        if message.chat.kind != "private" {
            return None;
        }
        let user_id = message.from.as_ref()?.id;
        let (name, args) = parse_command(message.text.as_deref().unwrap_or_default());
        return Some(SourceEvent::Command(Command {
            user_id,
            chat_id: message.chat.id,
            name,
            args,
        }));
    }

    if let Some(member) = &update.my_chat_member {
        if member.chat.kind != "channel" {
            return None;
        }
        let status = member.new_chat_member.status.as_str();
        return Some(SourceEvent::Membership(ChannelUpdate {
            channel_id: ChannelId(member.chat.id),
            username: member
                .chat
                .username
                .as_deref()
                .unwrap_or_default()
                .to_lowercase(),
            title: member.chat.title.clone().unwrap_or_default(),
            is_bot_added: !matches!(status, "left" | "kicked"),
        }));
    }

    None
}

fn post_update(post: &Message) -> PostUpdate {
    let mut attachments = Vec::new();
    // Only the largest rendition of a photo is kept.
    if let Some(largest) = post.photo.last() {
        attachments.push(Attachment::new("photo", largest.file_id.clone()));
    }
    if let Some(video) = &post.video {
        let name = video.file_name.clone().unwrap_or_else(|| "video".to_string());
        attachments.push(Attachment::new(name, video.file_id.clone()));
    }

    let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.is_empty());
    PostUpdate {
        channel_id: ChannelId(post.chat.id),
        group_key: GroupKey::from(post.media_group_id.clone()),
        text: non_empty(&post.caption).or_else(|| non_empty(&post.text)),
        attachments,
    }
}

/// Splits `/name@bot arg1 arg2` into `("name", ["arg1", "arg2"])`.
///
/// Text that is not a command yields an empty name.
pub fn parse_command(text: &str) -> (String, Vec<String>) {
    let mut parts = text.split_whitespace();
    let Some(head) = parts.next().and_then(|h| h.strip_prefix('/')) else {
        return (String::new(), Vec::new());
    };
    let name = head.split('@').next().unwrap_or_default().to_string();
    (name, parts.map(str::to_string).collect())
}

/// Thin Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    file_base: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, api_base_url: &str, token: &str) -> Self {
        let base = api_base_url.trim_end_matches('/');
        Self {
            http,
            api_base: format!("{base}/bot{token}"),
            file_base: format!("{base}/file/bot{token}"),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<T, TelegramError> {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(TelegramError::Api {
                code: response.error_code,
                description: response.description.unwrap_or_default(),
            });
        }
        response.result.ok_or(TelegramError::MissingResult(method))
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", json!({})).await
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ALLOWED_UPDATES,
            }),
        )
        .await
    }

    pub async fn get_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<ChatMember, TelegramError> {
        self.call(
            "getChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    pub async fn download(&self, file_id: &str) -> Result<FetchedFile, TelegramError> {
        let file: File = self.call("getFile", json!({ "file_id": file_id })).await?;
        let path = file
            .file_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TelegramError::MissingFilePath(file_id.to_string()))?;

        let bytes = self
            .http
            .get(format!("{}/{}", self.file_base, path))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Ok(FetchedFile {
            name,
            bytes: bytes.to_vec(),
        })
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _sent: serde_json::Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OwnerVerifier for TelegramClient {
    async fn is_channel_owner(
        &self,
        channel_id: ChannelId,
        user_id: i64,
    ) -> Result<bool, TelegramError> {
        let member = self.get_chat_member(channel_id.get(), user_id).await?;
        Ok(member.status == "creator")
    }
}

#[async_trait]
impl FileSource for TelegramClient {
    async fn fetch(&self, attachment: &Attachment) -> Result<FetchedFile, TelegramError> {
        self.download(&attachment.file_id).await
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout_secs: u64,
    pub retry_delay: Duration,
}

/// Long-polls until cancelled or the queue's consumer is gone.
pub async fn run_poller(
    client: Arc<TelegramClient>,
    tx: mpsc::Sender<SourceEvent>,
    settings: PollSettings,
    cancel: CancellationToken,
) {
    let mut offset = 0;
    tracing::info!(timeout_secs = settings.timeout_secs, "telegram poller started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = client.get_updates(offset, settings.timeout_secs) => batch,
        };

        let updates = match batch {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll updates");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_delay) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(event) = classify(&update) else {
                tracing::debug!(update_id = update.update_id, "ignoring update");
                continue;
            };
            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(event) => sent,
            };
            if sent.is_err() {
                tracing::info!("ingestion queue closed, stopping poller");
                return;
            }
        }
    }

    tracing::info!("telegram poller stopped");
}
