//! Cross-process invalidation fanout.
//!
//! When one process invalidates a tenant it publishes a small JSON event on a
//! shared channel. Every other process runs one listener task that applies
//! the event to its local state through the registered handlers. Delivery is
//! best-effort and at-most-once; local caches keep their own TTLs.

use crate::deadline::bounded;
use crate::stats::{FanoutStats, FanoutStatsSnapshot};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{Broadcast, MessageStream, TenancyResult, TenantId};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Wire format of an invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub tenant_id: TenantId,
    /// Instance id of the publishing process.
    pub origin: String,
    pub sent_at: DateTime<Utc>,
}

/// Callback that drops local state for one tenant.
pub type InvalidationHandler = Arc<dyn Fn(&TenantId) + Send + Sync>;

struct Shared {
    bus: Arc<dyn Broadcast>,
    channel: String,
    origin: String,
    /// Deadline for every publish and subscribe call.
    timeout: Duration,
    handlers: RwLock<Vec<InvalidationHandler>>,
    stats: FanoutStats,
}

pub struct InvalidationFanout {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationFanout {
    pub fn new(
        bus: Arc<dyn Broadcast>,
        channel: impl Into<String>,
        origin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus,
                channel: channel.into(),
                origin: origin.into(),
                timeout,
                handlers: RwLock::new(Vec::new()),
                stats: FanoutStats::default(),
            }),
            cancel: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn origin(&self) -> &str {
        &self.shared.origin
    }

    /// Register a handler for events from other processes.
    pub async fn subscribe(&self, handler: InvalidationHandler) {
        self.shared.handlers.write().await.push(handler);
    }

    /// Start the listener task. Calling it again is a no-op.
    ///
    /// The first subscription is attempted before returning, so events
    /// published after `start` completes are seen whenever the bus is up.
    pub async fn start(&self) {
        let mut listener = self.listener.lock().await;
        if listener.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let initial = match self.shared.subscribe().await {
            Ok(stream) => {
                info!(channel = %self.shared.channel, "Subscribed to tenant invalidations");
                Some(stream)
            }
            Err(e) => {
                warn!(
                    channel = %self.shared.channel,
                    error = %e,
                    "Initial invalidation subscription failed; retrying in background"
                );
                None
            }
        };

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        *listener = Some(tokio::spawn(listen(shared, cancel, initial)));
    }

    /// Announce that the tenant's metadata changed.
    ///
    /// Failures, including a bus that does not answer within the deadline,
    /// are logged and counted, never returned.
    pub async fn publish(&self, tenant_id: &TenantId) {
        let event = InvalidationEvent {
            tenant_id: tenant_id.clone(),
            origin: self.shared.origin.clone(),
            sent_at: Utc::now(),
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                self.shared.stats.record_publish_failure();
                warn!(tenant_id = %tenant_id, error = %e, "Failed to encode invalidation event");
                return;
            }
        };

        let published = bounded(
            "broadcast.publish",
            self.shared.timeout,
            self.shared.bus.publish(&self.shared.channel, &payload),
        )
        .await;
        match published {
            Ok(()) => {
                self.shared.stats.record_published();
                debug!(tenant_id = %tenant_id, channel = %self.shared.channel, "Published tenant invalidation");
            }
            Err(e) => {
                self.shared.stats.record_publish_failure();
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Failed to publish tenant invalidation; peers rely on TTL expiry"
                );
            }
        }
    }

    /// Stop the listener and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.listener.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Invalidation listener ended abnormally");
            }
        }
        debug!("Invalidation fanout stopped");
    }

    pub fn stats(&self) -> FanoutStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for InvalidationFanout {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(shared: Arc<Shared>, cancel: CancellationToken, mut stream: Option<MessageStream>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut active = match stream.take() {
            Some(active) => active,
            None => match shared.subscribe().await {
                Ok(active) => {
                    shared.stats.record_reconnect();
                    info!(channel = %shared.channel, "Resubscribed to tenant invalidations");
                    active
                }
                Err(e) => {
                    warn!(
                        channel = %shared.channel,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Invalidation subscription failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            },
        };
        backoff = INITIAL_BACKOFF;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                message = active.next() => {
                    match message {
                        Some(payload) => shared.apply(&payload).await,
                        None => {
                            warn!(channel = %shared.channel, "Invalidation stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("Invalidation listener shutting down");
}

impl Shared {
    async fn subscribe(&self) -> TenancyResult<MessageStream> {
        bounded("broadcast.subscribe", self.timeout, self.bus.subscribe(&self.channel)).await
    }

    async fn apply(&self, payload: &str) {
        let event: InvalidationEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, "Ignoring malformed invalidation event");
                return;
            }
        };

        // Ignore our own events
        if event.origin == self.origin {
            self.stats.record_ignored_own();
            return;
        }

        self.stats.record_received();
        let lag_ms = (Utc::now() - event.sent_at).num_milliseconds();
        debug!(
            tenant_id = %event.tenant_id,
            origin = %event.origin,
            lag_ms,
            "Applying tenant invalidation from peer"
        );
        for handler in self.handlers.read().await.iter() {
            handler(&event.tenant_id);
        }
    }
}
