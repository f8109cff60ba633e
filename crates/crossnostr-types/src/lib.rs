//! Shared domain types for the crossnostr bridge.
//!
//! This crate holds the values that flow between the source transport, the
//! update aggregator, and the publish pipeline: channel identifiers, group
//! keys, attachments, partial post updates, finished posts, channel
//! membership changes, and operator commands.
//!
//! Every other crate in the workspace depends on `crossnostr-types` for these
//! definitions and on nothing else for cross-cutting types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a source channel.
///
/// Stable for the lifetime of the channel; keys both aggregation state and
/// stored signing credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl ChannelId {
    /// Returns the raw numeric identifier.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChannelId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Transient key shared by every partial update that belongs to one
/// multi-attachment post.
///
/// The empty key means "ungrouped": the update is a complete post by itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Creates a group key. An empty string yields the ungrouped key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The ungrouped key.
    pub fn ungrouped() -> Self {
        Self(String::new())
    }

    /// Whether this key marks a single-event post.
    pub fn is_ungrouped(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Option<String>> for GroupKey {
    fn from(key: Option<String>) -> Self {
        Self(key.unwrap_or_default())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A media item attached to a post.
///
/// Holds only a handle to the bytes (`file_id`); nothing reads the bytes
/// until the post is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name or file name hint supplied by the source.
    pub name: String,
    /// Source-side handle used to resolve the byte stream later.
    pub file_id: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_id: file_id.into(),
        }
    }
}

/// One partial update event for a channel post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub channel_id: ChannelId,
    pub group_key: GroupKey,
    /// Text or caption carried by this update, if non-empty.
    pub text: Option<String>,
    /// Attachments in the order the source listed them.
    pub attachments: Vec<Attachment>,
}

/// A logical post whose group has closed.
///
/// Produced exactly once per closed group and consumed once by the
/// publish pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPost {
    pub channel_id: ChannelId,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// The bot was added to or removed from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    /// Public username, lowercased, without a leading `@`.
    pub username: String,
    pub title: String,
    pub is_bot_added: bool,
}

/// An operator command sent to the bot in a private chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// The user who sent the command.
    pub user_id: i64,
    /// The chat to reply into.
    pub chat_id: i64,
    /// Command name without the leading `/` or a `@botname` suffix.
    pub name: String,
    pub args: Vec<String>,
}

/// Everything the source transport can hand to the ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A partial channel post.
    Post(PostUpdate),
    /// A channel membership change for the bot.
    Membership(ChannelUpdate),
    /// An operator command.
    Command(Command),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_key_from_missing_media_group_is_ungrouped() {
        assert!(GroupKey::from(None).is_ungrouped());
        assert!(GroupKey::new("").is_ungrouped());
        assert!(!GroupKey::from(Some("13552".to_string())).is_ungrouped());
    }

    #[test]
    fn channel_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&ChannelId(-1001234)).unwrap();
        assert_eq!(json, "-1001234");
    }

    #[test]
    fn group_key_equality_is_by_value() {
        assert_eq!(GroupKey::new("g1"), GroupKey::new("g1"));
        assert_ne!(GroupKey::new("g1"), GroupKey::ungrouped());
    }
}
