//! In-process backends for single-process deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tenantry_core::{Broadcast, DistributedCache, MessageStream, TenancyResult};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Each entry lives for the TTL it was last written with.
struct WrittenTtl;

impl Expiry<String, Entry> for WrittenTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Key-value cache with per-entry expiry, held in process memory.
///
/// Expired entries are dropped by moka's housekeeping whether or not the
/// key is read again.
#[derive(Debug)]
pub struct InMemoryDistributedCache {
    entries: Cache<String, Entry>,
}

impl Default for InMemoryDistributedCache {
    fn default() -> Self {
        Self {
            entries: Cache::builder().expire_after(WrittenTtl).build(),
        }
    }
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> TenancyResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TenancyResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> TenancyResult<()> {
        self.entries.invalidate(key);
        Ok(())
    }
}

/// Publish/subscribe bus over Tokio broadcast channels.
///
/// Every resolver sharing one instance behaves like a separate process on a
/// shared bus.
#[derive(Debug)]
pub struct InMemoryBroadcast {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl Default for InMemoryBroadcast {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl Broadcast for InMemoryBroadcast {
    async fn publish(&self, channel: &str, message: &str) -> TenancyResult<()> {
        // No receivers is not an error: nobody else is listening yet.
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> TenancyResult<MessageStream> {
        let channel_name = channel.to_string();
        let stream = BroadcastStream::new(self.sender(channel).subscribe()).filter_map(move |item| {
            let message = match item {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(channel = %channel_name, error = %e, "Broadcast subscriber lagged");
                    None
                }
            };
            futures_util::future::ready(message)
        });
        Ok(stream.boxed())
    }
}
