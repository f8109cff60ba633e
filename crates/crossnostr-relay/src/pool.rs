//! Fan-out publishing over a fixed set of relays.
//!
//! The endpoint table is built once from configuration and never changes
//! shape. Each endpoint guards its own connection slot with a readers-writer
//! lock: publishers clone the link under a read lock and drop the lock before
//! any I/O, while a reconnect supervisor takes the write lock only to swap a
//! link in or out. An atomic flag per endpoint makes the supervisor its slot's
//! single writer.

use crate::connection::{RelayConnector, RelayLink};
use crate::error::RelayError;
use crossnostr_identity::SignedEvent;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Timeouts and backoff for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Bound on every connect and reconnect attempt.
    pub connect_timeout: Duration,
    /// Bound on each per-relay publish attempt.
    pub publish_timeout: Duration,
    /// Delay between failed reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    Connected,
    Reconnecting,
    /// The initial connect failed. The endpoint is never tried again.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub health: EndpointHealth,
}

struct Endpoint {
    url: String,
    slot: RwLock<Option<Arc<dyn RelayLink>>>,
    reconnecting: AtomicBool,
}

impl Endpoint {
    async fn live_link(&self) -> Option<Arc<dyn RelayLink>> {
        self.slot.read().await.clone()
    }
}

struct PoolInner {
    endpoints: Vec<Arc<Endpoint>>,
    connector: Arc<dyn RelayConnector>,
    config: PoolConfig,
    cancel: CancellationToken,
    supervisors: TaskTracker,
}

/// Owns the relay connections. Cheap to clone; clones share one table.
#[derive(Clone)]
pub struct RelayPool {
    inner: Arc<PoolInner>,
}

impl RelayPool {
    /// Connects to every URL concurrently, each attempt bounded by
    /// `connect_timeout`.
    ///
    /// Failures are logged and leave that endpoint [`EndpointHealth::Unreachable`].
    /// Duplicate URLs are collapsed; order is otherwise preserved. Cancelling
    /// `cancel` stops the supervisors and further publishes; only
    /// [`shutdown`](Self::shutdown) also closes the links.
    pub async fn connect(
        urls: &[String],
        connector: Arc<dyn RelayConnector>,
        config: PoolConfig,
        cancel: CancellationToken,
    ) -> Self {
        let mut unique: Vec<&String> = Vec::with_capacity(urls.len());
        for url in urls {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }

        let attempts = unique.iter().map(|url| {
            let connector = Arc::clone(&connector);
            async move {
                let link = match within(config.connect_timeout, connector.connect(url)).await {
                    Ok(link) => {
                        tracing::info!(relay = %url, "connected to relay");
                        Some(link)
                    }
                    Err(e) => {
                        tracing::error!(relay = %url, error = %e, "failed to connect to relay");
                        None
                    }
                };
                Arc::new(Endpoint {
                    url: url.to_string(),
                    slot: RwLock::new(link),
                    reconnecting: AtomicBool::new(false),
                })
            }
        });
        let endpoints = join_all(attempts).await;

        Self {
            inner: Arc::new(PoolInner {
                endpoints,
                connector,
                config,
                cancel: cancel.child_token(),
                supervisors: TaskTracker::new(),
            }),
        }
    }

    /// Publishes to every endpoint holding a live link, concurrently.
    ///
    /// Returns the URLs of relays that accepted the event, in configuration
    /// order. Endpoints without a link are skipped. An attempt that errors or
    /// outlives `publish_timeout` evicts that link and starts a background
    /// reconnect; a relay that answers with a rejection is simply not counted.
    /// Never waits for a reconnect.
    pub async fn publish(&self, event: &SignedEvent) -> Vec<String> {
        if self.inner.cancel.is_cancelled() {
            tracing::debug!(event_id = event.id(), "pool is shut down, not publishing");
            return Vec::new();
        }

        let attempts = self
            .inner
            .endpoints
            .iter()
            .map(|endpoint| self.attempt(endpoint, event));
        let accepted: Vec<String> = join_all(attempts).await.into_iter().flatten().collect();

        tracing::info!(
            event_id = event.id(),
            event_pubkey = event.pubkey(),
            relays = ?accepted,
            "published event"
        );
        accepted
    }

    async fn attempt(&self, endpoint: &Arc<Endpoint>, event: &SignedEvent) -> Option<String> {
        let link = endpoint.live_link().await?;
        let bound = self.inner.config.publish_timeout;

        let failure = match within(bound, link.publish(event)).await {
            Ok(ack) if ack.accepted => return Some(endpoint.url.clone()),
            Ok(ack) => {
                tracing::warn!(
                    relay = %endpoint.url,
                    event_id = event.id(),
                    reason = %ack.message,
                    "relay rejected event"
                );
                return None;
            }
            Err(e) => e,
        };

        tracing::error!(
            relay = %endpoint.url,
            event_id = event.id(),
            error = %failure,
            "failed to publish event"
        );
        self.start_reconnect(endpoint, &link).await;
        None
    }

    /// Evicts `failed` and spawns a supervisor, unless one already owns the
    /// endpoint or a newer link has replaced `failed`.
    async fn start_reconnect(&self, endpoint: &Arc<Endpoint>, failed: &Arc<dyn RelayLink>) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if endpoint
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(relay = %endpoint.url, "reconnect already in progress");
            return;
        }

        let evicted = {
            let mut slot = endpoint.slot.write().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, failed) => slot.take(),
                _ => None,
            }
        };
        let Some(evicted) = evicted else {
            endpoint.reconnecting.store(false, Ordering::Release);
            tracing::debug!(relay = %endpoint.url, "stale failure, link already replaced");
            return;
        };

        tracing::warn!(relay = %endpoint.url, "relay marked for reconnect");
        let inner = Arc::clone(&self.inner);
        let endpoint = Arc::clone(endpoint);
        self.inner.supervisors.spawn(async move {
            // Closing can stall on a dead socket; keep it off the publish path.
            if timeout(inner.config.connect_timeout, evicted.close()).await.is_err() {
                tracing::debug!(relay = %endpoint.url, "gave up closing failed link");
            }
            supervise(inner, endpoint).await;
        });
    }

    /// Health of each endpoint, in configuration order.
    pub async fn status(&self) -> Vec<EndpointStatus> {
        let mut statuses = Vec::with_capacity(self.inner.endpoints.len());
        for endpoint in &self.inner.endpoints {
            let health = if endpoint.reconnecting.load(Ordering::Acquire) {
                EndpointHealth::Reconnecting
            } else if endpoint.slot.read().await.is_some() {
                EndpointHealth::Connected
            } else {
                EndpointHealth::Unreachable
            };
            statuses.push(EndpointStatus {
                url: endpoint.url.clone(),
                health,
            });
        }
        statuses
    }

    /// Whether the pool has been shut down. Nothing published afterwards
    /// reaches a relay.
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Number of reconnect supervisors still running.
    pub fn reconnects_in_flight(&self) -> usize {
        self.inner.supervisors.len()
    }

    /// Stops every supervisor, waits for them, then closes all live links.
    ///
    /// Publishes issued afterwards return an empty set.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.supervisors.close();
        self.inner.supervisors.wait().await;

        for endpoint in &self.inner.endpoints {
            let link = endpoint.slot.write().await.take();
            if let Some(link) = link {
                link.close().await;
            }
        }
        tracing::info!("relay pool shut down");
    }
}

/// Retries the endpoint until a link is installed or the pool is cancelled.
async fn supervise(inner: Arc<PoolInner>, endpoint: Arc<Endpoint>) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let connect = within(
            inner.config.connect_timeout,
            inner.connector.connect(&endpoint.url),
        );
        let outcome = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            outcome = connect => outcome,
        };

        match outcome {
            Ok(link) => {
                if inner.cancel.is_cancelled() {
                    link.close().await;
                    break;
                }
                *endpoint.slot.write().await = Some(link);
                endpoint.reconnecting.store(false, Ordering::Release);
                tracing::info!(relay = %endpoint.url, attempt, "reconnected to relay");
                return;
            }
            Err(e) => {
                tracing::error!(
                    relay = %endpoint.url,
                    attempt,
                    error = %e,
                    "failed to reconnect to relay"
                );
            }
        }

        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }
    tracing::debug!(relay = %endpoint.url, "reconnect supervisor stopped");
}

/// Runs `operation`, failing with [`RelayError::Timeout`] once `bound` elapses.
async fn within<T>(
    bound: Duration,
    operation: impl Future<Output = Result<T, RelayError>>,
) -> Result<T, RelayError> {
    timeout(bound, operation)
        .await
        .map_err(|_| RelayError::Timeout(bound))?
}
