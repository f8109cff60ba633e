//! Crossnostr bridge library logic.
//!
//! Mirrors Telegram channel posts to Nostr relays: the [`telegram`] poller
//! feeds the [`bridge`] ingestion loop, which reassembles posts in the
//! [`aggregator`] and hands them to the [`publisher`].

pub mod aggregator;
pub mod api;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod publisher;
pub mod telegram;
pub mod uploader;

pub use aggregator::Aggregator;
pub use api::{app, AppState};
pub use bridge::{Bridge, SHUTDOWN_GRACE};
pub use commands::{CommandError, CommandHandler, Messenger, OwnerVerifier};
pub use publisher::{
    DropReason, Fanout, FetchedFile, FileSource, PublishOutcome, Publisher, Uploader,
};
pub use telegram::{run_poller, PollSettings, TelegramClient, TelegramError};
pub use uploader::{HttpUploader, UploadError};
