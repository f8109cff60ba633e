//! Operator commands sent to the bot in private chats.

use crate::telegram::TelegramError;
use async_trait::async_trait;
use crossnostr_channels::{normalize_username, ChannelDirectory, ChannelError, TelegramChannel};
use crossnostr_identity::{decode_nsec, CredentialStore, IdentityError, KeyError};
use crossnostr_types::{ChannelId, Command};
use std::sync::Arc;
use thiserror::Error;

pub const WELCOME_MESSAGE: &str = "Welcome to the Cross Nostter bot!
This bot posts the messages of your Telegram channel to the Nostr network.

To start using the bot:
1. Add it to your channel as an administrator (you can remove all permissions).
2. Send the \"/set_nsec @AteoBreaking nsec1...\" command to the bot with the name of your channel and your nsec as arguments
(the nsec can be exported from the Nostr app you use, it starts with nsec1).

After that, every message of your channel is published to Nostr under your npub.";

pub const INVALID_COMMAND: &str = "Invalid command";
pub const NSEC_SET: &str = "Nsec successfully set";
pub const NOT_OWNER: &str = "Failed to set nsec, you are not channel owner";
pub const SET_NSEC_USAGE: &str =
    "Failed to set nsec, command example: /set_nsec @AteoBreaking nsec1";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("expected 2 arguments, got {0}")]
    ArgumentCount(usize),

    #[error("channel @{0} is not registered")]
    UnknownChannel(String),

    #[error("user {user_id} does not own channel {channel_id}")]
    NotOwner { user_id: i64, channel_id: ChannelId },

    #[error("invalid nsec: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("channel directory error: {0}")]
    Directory(#[from] ChannelError),

    #[error("credential store error: {0}")]
    Credentials(#[from] IdentityError),

    #[error("ownership check failed: {0}")]
    Telegram(#[from] TelegramError),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CommandError {
    /// Text shown to the user who issued the failed command.
    pub fn reply(&self) -> &'static str {
        match self {
            CommandError::NotOwner { .. } => NOT_OWNER,
            _ => SET_NSEC_USAGE,
        }
    }
}

/// Answers whether a user created a channel.
#[async_trait]
pub trait OwnerVerifier: Send + Sync {
    async fn is_channel_owner(
        &self,
        channel_id: ChannelId,
        user_id: i64,
    ) -> Result<bool, TelegramError>;
}

/// Sends reply text into a chat.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError>;
}

pub struct CommandHandler {
    directory: Arc<dyn ChannelDirectory>,
    credentials: Arc<dyn CredentialStore>,
    owners: Arc<dyn OwnerVerifier>,
}

impl CommandHandler {
    pub fn new(
        directory: Arc<dyn ChannelDirectory>,
        credentials: Arc<dyn CredentialStore>,
        owners: Arc<dyn OwnerVerifier>,
    ) -> Self {
        Self {
            directory,
            credentials,
            owners,
        }
    }

    /// Runs a command and returns the reply, if one is due.
    pub async fn handle(&self, command: &Command) -> Option<&'static str> {
        if command.name == "start" {
            return Some(WELCOME_MESSAGE);
        }
        if command.name.is_empty() || command.args.is_empty() {
            return Some(INVALID_COMMAND);
        }

        match command.name.as_str() {
            "set_nsec" => match self.set_nsec(command).await {
                Ok(channel) => {
                    tracing::info!(
                        channel_id = %channel.channel_id,
                        username = %channel.username,
                        user_id = command.user_id,
                        "nsec set"
                    );
                    Some(NSEC_SET)
                }
                Err(e) => {
                    tracing::warn!(user_id = command.user_id, error = %e, "set_nsec rejected");
                    Some(e.reply())
                }
            },
            other => {
                tracing::debug!(command = other, "ignoring unknown command");
                None
            }
        }
    }

    /// Handles a command and delivers its reply.
    pub async fn respond(&self, messenger: &dyn Messenger, command: &Command) {
        let Some(reply) = self.handle(command).await else {
            return;
        };
        if let Err(e) = messenger.send_message(command.chat_id, reply).await {
            tracing::warn!(chat_id = command.chat_id, error = %e, "failed to send reply");
        }
    }

    async fn set_nsec(&self, command: &Command) -> Result<TelegramChannel, CommandError> {
        let [username, nsec] = command.args.as_slice() else {
            return Err(CommandError::ArgumentCount(command.args.len()));
        };

        let directory = Arc::clone(&self.directory);
        let lookup = username.clone();
        let channel = tokio::task::spawn_blocking(move || directory.lookup(&lookup))
            .await??
            .ok_or_else(|| CommandError::UnknownChannel(normalize_username(username)))?;

        if !self
            .owners
            .is_channel_owner(channel.channel_id, command.user_id)
            .await?
        {
            return Err(CommandError::NotOwner {
                user_id: command.user_id,
                channel_id: channel.channel_id,
            });
        }

        let identity = decode_nsec(nsec)?;
        let store = Arc::clone(&self.credentials);
        let channel_id = channel.channel_id;
        tokio::task::spawn_blocking(move || store.set(channel_id, &identity)).await??;
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossnostr_identity::SigningIdentity;
    use crossnostr_types::ChannelUpdate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const NSEC: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";
    const OWNER: i64 = 42;

    #[derive(Default)]
    struct FakeDirectory;

    impl ChannelDirectory for FakeDirectory {
        fn upsert(&self, _update: &ChannelUpdate) -> Result<(), ChannelError> {
            Ok(())
        }

        fn lookup(&self, username: &str) -> Result<Option<TelegramChannel>, ChannelError> {
            Ok((normalize_username(username) == "ateobreaking").then(|| TelegramChannel {
                channel_id: ChannelId(-100),
                name: "Ateo".into(),
                username: "ateobreaking".into(),
                description: String::new(),
                photo_url: String::new(),
                is_bot_added: true,
                created_at: String::new(),
                updated_at: String::new(),
            }))
        }
    }

    #[derive(Default)]
    struct FakeStore {
        linked: Mutex<HashMap<ChannelId, SigningIdentity>>,
    }

    impl CredentialStore for FakeStore {
        fn get(&self, channel_id: ChannelId) -> Result<Option<SigningIdentity>, IdentityError> {
            Ok(self.linked.lock().unwrap().get(&channel_id).cloned())
        }

        fn set(
            &self,
            channel_id: ChannelId,
            identity: &SigningIdentity,
        ) -> Result<(), IdentityError> {
            self.linked.lock().unwrap().insert(channel_id, identity.clone());
            Ok(())
        }
    }

    struct FakeOwners;

    #[async_trait]
    impl OwnerVerifier for FakeOwners {
        async fn is_channel_owner(
            &self,
            _channel_id: ChannelId,
            user_id: i64,
        ) -> Result<bool, TelegramError> {
            Ok(user_id == OWNER)
        }
    }

    fn handler() -> (CommandHandler, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::default());
        let handler = CommandHandler::new(
            Arc::new(FakeDirectory),
            store.clone(),
            Arc::new(FakeOwners),
        );
        (handler, store)
    }

    fn command(user_id: i64, name: &str, args: &[&str]) -> Command {
        Command {
            user_id,
            chat_id: 1,
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn start_replies_with_welcome() {
        let (handler, _) = handler();
        assert_eq!(handler.handle(&command(1, "start", &[])).await, Some(WELCOME_MESSAGE));
    }

    #[tokio::test]
    async fn missing_name_or_arguments_is_invalid() {
        let (handler, _) = handler();
        assert_eq!(handler.handle(&command(1, "", &[])).await, Some(INVALID_COMMAND));
        assert_eq!(
            handler.handle(&command(1, "set_nsec", &[])).await,
            Some(INVALID_COMMAND)
        );
    }

    #[tokio::test]
    async fn owner_links_key() {
        let (handler, store) = handler();
        let reply = handler
            .handle(&command(OWNER, "set_nsec", &["@AteoBreaking", NSEC]))
            .await;
        assert_eq!(reply, Some(NSEC_SET));

        let linked = store.get(ChannelId(-100)).unwrap().unwrap();
        assert_eq!(linked, decode_nsec(NSEC).unwrap());
    }

    #[tokio::test]
    async fn non_owner_is_refused_without_side_effects() {
        let (handler, store) = handler();
        let reply = handler
            .handle(&command(7, "set_nsec", &["@AteoBreaking", NSEC]))
            .await;
        assert_eq!(reply, Some(NOT_OWNER));
        assert!(store.get(ChannelId(-100)).unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_input_gets_usage_hint() {
        let (handler, store) = handler();
        for args in [
            vec!["@AteoBreaking"],
            vec!["@AteoBreaking", NSEC, "extra"],
            vec!["@unknown", NSEC],
            vec!["@AteoBreaking", "nsec1garbage"],
            vec![
                "@AteoBreaking",
                "npub180cvv07tjdrrgpa0j7j7tmnyl2yr6yr7l8j4s3evf6u64th6gkwsyjh6w6",
            ],
        ] {
            let reply = handler.handle(&command(OWNER, "set_nsec", &args)).await;
            assert_eq!(reply, Some(SET_NSEC_USAGE), "args {args:?}");
        }
        assert!(store.get(ChannelId(-100)).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let (handler, _) = handler();
        assert_eq!(handler.handle(&command(1, "help", &["me"])).await, None);
    }
}
