//! Channel identities for the crossnostr bridge.
//!
//! A channel publishes to relays under its own key pair. This crate decodes
//! operator-supplied `nsec` keys, signs NIP-01 text notes with BIP-340
//! Schnorr signatures, and persists the per-channel key in SQLite.

mod event;
mod keys;
mod store;

pub use event::{sign_text_note, SignedEvent, KIND_TEXT_NOTE};
pub use keys::{decode_nsec, KeyError, SigningIdentity};
pub use store::{
    find_account, upsert_account, CredentialStore, IdentityError,
    SqliteCredentialStore,
};
