//! Per-channel signing credentials.
//!
//! Each channel links at most one identity, stored in `nostr_accounts` as its
//! bech32 `npub`/`nsec` pair. Identities are read fresh on every publish so a
//! relinked key takes effect on the next post.

use crate::keys::{decode_nsec, KeyError, SigningIdentity};
use crossnostr_db::DbPool;
use crossnostr_types::ChannelId;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Errors raised by credential persistence.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored key no longer decodes.
    #[error("stored key for channel {channel_id} is unusable: {source}")]
    CorruptKey { channel_id: ChannelId, source: KeyError },

    #[error("key encoding error: {0}")]
    Key(#[from] KeyError),
}

/// Lookup and linking of channel identities.
pub trait CredentialStore: Send + Sync {
    /// Returns the channel's identity, or `None` if the channel has no linked
    /// key or cross posting is switched off.
    fn get(&self, channel_id: ChannelId) -> Result<Option<SigningIdentity>, IdentityError>;

    /// Links `identity` to the channel, replacing any previous key and
    /// enabling cross posting.
    fn set(&self, channel_id: ChannelId, identity: &SigningIdentity) -> Result<(), IdentityError>;
}

/// Inserts or replaces the identity linked to a channel.
pub fn upsert_account(
    conn: &Connection,
    channel_id: ChannelId,
    identity: &SigningIdentity,
) -> Result<(), IdentityError> {
    let npub = identity.npub()?;
    let nsec = identity.nsec()?;
    conn.execute(
        "INSERT INTO nostr_accounts (telegram_channel_id, npub, nsec, cross_posting_enabled)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (telegram_channel_id) DO UPDATE SET
            npub = excluded.npub,
            nsec = excluded.nsec,
            cross_posting_enabled = 1,
            updated_at = datetime('now')",
        params![channel_id.get(), npub, nsec],
    )?;
    Ok(())
}

/// Loads the identity linked to a channel, if cross posting is enabled.
pub fn find_account(
    conn: &Connection,
    channel_id: ChannelId,
) -> Result<Option<SigningIdentity>, IdentityError> {
    let nsec: Option<String> = conn
        .query_row(
            "SELECT nsec FROM nostr_accounts
             WHERE telegram_channel_id = ?1 AND cross_posting_enabled = 1",
            params![channel_id.get()],
            |row| row.get(0),
        )
        .optional()?;

    nsec.map(|nsec| {
        decode_nsec(&nsec).map_err(|source| IdentityError::CorruptKey { channel_id, source })
    })
    .transpose()
}

/// [`CredentialStore`] backed by the shared SQLite pool.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, channel_id: ChannelId) -> Result<Option<SigningIdentity>, IdentityError> {
        let conn = self.pool.get()?;
        find_account(&conn, channel_id)
    }

    fn set(&self, channel_id: ChannelId, identity: &SigningIdentity) -> Result<(), IdentityError> {
        let conn = self.pool.get()?;
        upsert_account(&conn, channel_id, identity)?;
        tracing::debug!(%channel_id, pubkey = %identity.public_key_hex(), "linked channel identity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossnostr_db::run_migrations;

    const NSEC_A: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn other_identity() -> SigningIdentity {
        SigningIdentity::from_secret_bytes(&[0x11; 32]).unwrap()
    }

    fn disable_cross_posting(conn: &Connection, channel_id: ChannelId) {
        conn.execute(
            "UPDATE nostr_accounts SET cross_posting_enabled = 0 WHERE telegram_channel_id = ?1",
            params![channel_id.get()],
        )
        .unwrap();
    }

    #[test]
    fn missing_channel_has_no_identity() {
        assert!(find_account(&conn(), ChannelId(-100)).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_previous_key() {
        let conn = conn();
        let channel = ChannelId(-1001);
        upsert_account(&conn, channel, &decode_nsec(NSEC_A).unwrap()).unwrap();
        upsert_account(&conn, channel, &other_identity()).unwrap();

        let stored = find_account(&conn, channel).unwrap().unwrap();
        assert_eq!(stored, other_identity());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM nostr_accounts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn disabled_cross_posting_hides_identity_until_relinked() {
        let conn = conn();
        let channel = ChannelId(7);
        upsert_account(&conn, channel, &other_identity()).unwrap();

        disable_cross_posting(&conn, channel);
        assert!(find_account(&conn, channel).unwrap().is_none());

        upsert_account(&conn, channel, &other_identity()).unwrap();
        assert!(find_account(&conn, channel).unwrap().is_some());
    }

    #[test]
    fn corrupt_stored_key_is_an_error() {
        let conn = conn();
        conn.execute(
            "INSERT INTO nostr_accounts (telegram_channel_id, npub, nsec) VALUES (5, 'npub1x', 'garbage')",
            [],
        )
        .unwrap();

        match find_account(&conn, ChannelId(5)) {
            Err(IdentityError::CorruptKey { channel_id, .. }) => {
                assert_eq!(channel_id, ChannelId(5))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
