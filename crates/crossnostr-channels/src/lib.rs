//! Directory of source channels the bot has been added to.
//!
//! Membership changes reported by the source upsert a row per channel. Operator
//! commands address channels by their public `@username`, so lookups go by
//! normalized username and only see channels where the bot is still present.

use crossnostr_db::DbPool;
use crossnostr_types::{ChannelId, ChannelUpdate};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// A channel as recorded in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramChannel {
    pub channel_id: ChannelId,
    /// Display title.
    pub name: String,
    /// Normalized username (lowercase, no `@`).
    pub username: String,
    pub description: String,
    pub photo_url: String,
    /// Whether the bot is currently a member.
    pub is_bot_added: bool,
    /// Creation timestamp (SQLite `datetime`).
    pub created_at: String,
    pub updated_at: String,
}

/// Strips a leading `@` and lowercases.
pub fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

/// Inserts the channel or refreshes its title, username and membership flag.
pub fn upsert_channel(conn: &Connection, update: &ChannelUpdate) -> Result<(), ChannelError> {
    conn.execute(
        "INSERT INTO telegram_channels (channel_id, channel_name, channel_username, is_bot_added)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (channel_id) DO UPDATE SET
            channel_name = excluded.channel_name,
            channel_username = excluded.channel_username,
            is_bot_added = excluded.is_bot_added,
            channel_updated_at = datetime('now')",
        params![
            update.channel_id.get(),
            update.title,
            normalize_username(&update.username),
            update.is_bot_added,
        ],
    )?;
    Ok(())
}

/// Finds a channel the bot is still a member of by its username.
pub fn find_active_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<TelegramChannel>, ChannelError> {
    let username = normalize_username(username);
    if username.is_empty() {
        return Ok(None);
    }

    let channel = conn
        .query_row(
            "SELECT channel_id, channel_name, channel_username, channel_description,
                    channel_photo_url, is_bot_added, channel_created_at, channel_updated_at
             FROM telegram_channels
             WHERE channel_username = ?1 AND is_bot_added = 1",
            params![username],
            map_row_to_channel,
        )
        .optional()?;
    Ok(channel)
}

fn map_row_to_channel(row: &Row) -> rusqlite::Result<TelegramChannel> {
    Ok(TelegramChannel {
        channel_id: ChannelId(row.get(0)?),
        name: row.get(1)?,
        username: row.get(2)?,
        description: row.get(3)?,
        photo_url: row.get(4)?,
        is_bot_added: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Channel records used by membership handling and operator commands.
pub trait ChannelDirectory: Send + Sync {
    fn upsert(&self, update: &ChannelUpdate) -> Result<(), ChannelError>;

    /// Looks a channel up by `@username` or `username`, case-insensitively.
    fn lookup(&self, username: &str) -> Result<Option<TelegramChannel>, ChannelError>;
}

/// [`ChannelDirectory`] backed by the shared SQLite pool.
#[derive(Clone)]
pub struct SqliteChannelDirectory {
    pool: DbPool,
}

impl SqliteChannelDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ChannelDirectory for SqliteChannelDirectory {
    fn upsert(&self, update: &ChannelUpdate) -> Result<(), ChannelError> {
        let conn = self.pool.get()?;
        upsert_channel(&conn, update)?;
        tracing::info!(
            channel_id = %update.channel_id,
            username = %update.username,
            is_bot_added = update.is_bot_added,
            "channel membership updated"
        );
        Ok(())
    }

    fn lookup(&self, username: &str) -> Result<Option<TelegramChannel>, ChannelError> {
        let conn = self.pool.get()?;
        find_active_by_username(&conn, username)
    }
}
