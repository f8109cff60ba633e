//! Reassembles logical posts from bursts of partial channel updates.
//!
//! A multi-attachment post reaches the bridge as several updates sharing a
//! transient group key, with no end-of-burst marker. Each channel holds at
//! most one open post; it closes when the channel's next update carries a
//! different key, when an update is ungrouped, or (optionally) after an idle
//! window.

use crossnostr_types::{Attachment, ChannelId, CompletedPost, GroupKey, PostUpdate};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct PendingPost {
    group_key: GroupKey,
    text: Option<String>,
    attachments: Vec<Attachment>,
    last_update: Instant,
}

impl PendingPost {
    fn open(group_key: GroupKey, now: Instant) -> Self {
        Self {
            group_key,
            text: None,
            attachments: Vec::new(),
            last_update: now,
        }
    }

    fn close(self, channel_id: ChannelId) -> CompletedPost {
        CompletedPost {
            channel_id,
            text: self.text.unwrap_or_default(),
            attachments: self.attachments,
        }
    }
}

/// Per-channel aggregation state. Owned by the single ingestion task.
#[derive(Debug, Default)]
pub struct Aggregator {
    pending: HashMap<ChannelId, PendingPost>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one update into its channel's open post.
    ///
    /// Returns the posts this update closed, oldest first: the channel's
    /// previous group if the key changed, then this update's own post if it
    /// is ungrouped.
    pub fn apply(&mut self, update: PostUpdate) -> Vec<CompletedPost> {
        self.apply_at(update, Instant::now())
    }

    fn apply_at(&mut self, update: PostUpdate, now: Instant) -> Vec<CompletedPost> {
        let PostUpdate {
            channel_id,
            group_key,
            text,
            attachments,
        } = update;
        let mut closed = Vec::new();

        let mut post = match self.pending.remove(&channel_id) {
            Some(open) if open.group_key == group_key => open,
            Some(open) => {
                tracing::debug!(
                    %channel_id,
                    previous = %open.group_key,
                    next = %group_key,
                    "group key changed, closing post"
                );
                closed.push(open.close(channel_id));
                PendingPost::open(group_key, now)
            }
            None => PendingPost::open(group_key, now),
        };

        post.attachments.extend(attachments);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            post.text = Some(text);
        }
        post.last_update = now;

        if post.group_key.is_ungrouped() {
            closed.push(post.close(channel_id));
        } else {
            self.pending.insert(channel_id, post);
        }
        closed
    }

    /// Closes every open post whose last update is at least `window` old.
    pub fn flush_idle(&mut self, now: Instant, window: Duration) -> Vec<CompletedPost> {
        let expired: Vec<ChannelId> = self
            .pending
            .iter()
            .filter(|(_, post)| now.saturating_duration_since(post.last_update) >= window)
            .map(|(channel_id, _)| *channel_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|channel_id| {
                self.pending.remove(&channel_id).map(|post| {
                    tracing::debug!(%channel_id, group = %post.group_key, "idle group flushed");
                    post.close(channel_id)
                })
            })
            .collect()
    }

    /// Drops every open post and returns how many were lost.
    pub fn discard_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Number of channels with an open post.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
