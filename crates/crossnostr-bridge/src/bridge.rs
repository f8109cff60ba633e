//! The ingestion loop.
//!
//! A single task drains the source queue in arrival order. Post updates go
//! through the [`Aggregator`]; every post it closes is published on its own
//! tracked task so a slow upload or relay never holds up the next update.
//! Membership changes and commands are handled the same way, off the loop.
//! Once the loop stops, that work gets [`SHUTDOWN_GRACE`] to finish before
//! publishes and command replies are abandoned.

use crate::aggregator::Aggregator;
use crate::commands::{CommandHandler, Messenger};
use crate::publisher::Publisher;
use crossnostr_channels::ChannelDirectory;
use crossnostr_types::{ChannelUpdate, Command, CompletedPost, SourceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long in-flight work may run after the loop stops.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct Bridge {
    aggregator: Aggregator,
    publisher: Arc<Publisher>,
    directory: Arc<dyn ChannelDirectory>,
    commands: Arc<CommandHandler>,
    messenger: Arc<dyn Messenger>,
    idle_flush: Option<Duration>,
    tasks: TaskTracker,
    abandon: CancellationToken,
}

impl Bridge {
    pub fn new(
        publisher: Arc<Publisher>,
        directory: Arc<dyn ChannelDirectory>,
        commands: Arc<CommandHandler>,
        messenger: Arc<dyn Messenger>,
        idle_flush: Option<Duration>,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(),
            publisher,
            directory,
            commands,
            messenger,
            idle_flush,
            tasks: TaskTracker::new(),
            abandon: CancellationToken::new(),
        }
    }

    /// Consumes `rx` until it closes or `cancel` fires, then waits for every
    /// task it started.
    ///
    /// Posts still being aggregated at that point are discarded. Tasks still
    /// running after the shutdown grace are abandoned.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SourceEvent>, cancel: CancellationToken) {
        let mut ticker = self.idle_flush.map(|window| {
            let mut ticker = tokio::time::interval(window / 2);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        tracing::info!(idle_flush = ?self.idle_flush, "ingestion loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("ingestion cancelled");
                    break;
                }
                _ = next_tick(&mut ticker) => self.flush_idle(),
                event = rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        tracing::info!("source closed");
                        break;
                    }
                },
            }
        }

        let discarded = self.aggregator.discard_all();
        if discarded > 0 {
            tracing::warn!(discarded, "discarding posts still being aggregated");
        }

        self.tasks.close();
        tracing::info!(in_flight = self.tasks.len(), "waiting for in-flight tasks");
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tasks.len(),
                grace = ?SHUTDOWN_GRACE,
                "in-flight tasks outlived the shutdown grace"
            );
            self.abandon.cancel();
            self.tasks.wait().await;
        }
        tracing::info!("ingestion loop stopped");
    }

    fn dispatch(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Post(update) => {
                for post in self.aggregator.apply(update) {
                    self.spawn_publish(post);
                }
            }
            SourceEvent::Membership(update) => self.spawn_membership(update),
            SourceEvent::Command(command) => self.spawn_command(command),
        }
    }

    fn flush_idle(&mut self) {
        let Some(window) = self.idle_flush else {
            return;
        };
        for post in self.aggregator.flush_idle(Instant::now(), window) {
            self.spawn_publish(post);
        }
    }

    fn spawn_publish(&self, post: CompletedPost) {
        let publisher = Arc::clone(&self.publisher);
        let abandon = self.abandon.clone();
        self.tasks.spawn(async move {
            let channel_id = post.channel_id;
            tokio::select! {
                _ = publisher.publish(post) => {}
                () = abandon.cancelled() => {
                    tracing::warn!(%channel_id, "abandoning post still being published");
                }
            }
        });
    }

    fn spawn_membership(&self, update: ChannelUpdate) {
        let directory = Arc::clone(&self.directory);
        self.tasks.spawn(async move {
            let channel_id = update.channel_id;
            match tokio::task::spawn_blocking(move || directory.upsert(&update)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(%channel_id, error = %e, "failed to record channel membership");
                }
                Err(e) => {
                    tracing::error!(%channel_id, error = %e, "membership task failed");
                }
            }
        });
    }

    fn spawn_command(&self, command: Command) {
        let commands = Arc::clone(&self.commands);
        let messenger = Arc::clone(&self.messenger);
        let abandon = self.abandon.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                () = commands.respond(messenger.as_ref(), &command) => {}
                () = abandon.cancelled() => {
                    tracing::warn!(chat_id = command.chat_id, "abandoning command reply");
                }
            }
        });
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
