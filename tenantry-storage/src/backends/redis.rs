//! Redis-backed distributed cache and broadcast bus.
//!
//! Commands go over one multiplexed connection; each subscription gets its
//! own dedicated pub/sub connection, as Redis requires.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tenantry_core::{Broadcast, DistributedCache, MessageStream, TenancyError, TenancyResult};
use tracing::{debug, warn};

fn cache_error(e: redis::RedisError) -> TenancyError {
    TenancyError::cache(e)
}

/// Open a client and a multiplexed command connection.
async fn connect(redis_url: &str) -> TenancyResult<(redis::Client, MultiplexedConnection)> {
    let client = redis::Client::open(redis_url).map_err(cache_error)?;
    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(cache_error)?;
    Ok((client, connection))
}

/// [`DistributedCache`] over Redis `GET` / `SET PX` / `DEL`.
#[derive(Clone)]
pub struct RedisDistributedCache {
    connection: MultiplexedConnection,
}

impl RedisDistributedCache {
    pub async fn connect(redis_url: &str) -> TenancyResult<Self> {
        let (_, connection) = connect(redis_url).await?;
        debug!("Connected Redis distributed cache");
        Ok(Self { connection })
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    /// Round-trip a `PING`, for readiness checks.
    pub async fn ping(&self) -> TenancyResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_error)
    }
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get(&self, key: &str) -> TenancyResult<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TenancyResult<()> {
        // Redis rejects a zero expiry.
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn del(&self, key: &str) -> TenancyResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_error)
    }
}

/// [`Broadcast`] over Redis `PUBLISH` / `SUBSCRIBE`.
#[derive(Clone)]
pub struct RedisBroadcast {
    client: redis::Client,
    connection: MultiplexedConnection,
}

impl RedisBroadcast {
    pub async fn connect(redis_url: &str) -> TenancyResult<Self> {
        let (client, connection) = connect(redis_url).await?;
        debug!("Connected Redis broadcast");
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl Broadcast for RedisBroadcast {
    async fn publish(&self, channel: &str, message: &str) -> TenancyResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn subscribe(&self, channel: &str) -> TenancyResult<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(cache_error)?;
        pubsub.subscribe(channel).await.map_err(cache_error)?;
        debug!(channel, "Subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "Failed to get Pub/Sub payload");
                    None
                }
            };
            futures_util::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}
