//! Concrete [`DistributedCache`] and [`Broadcast`] backends.
//!
//! [`DistributedCache`]: tenantry_core::DistributedCache
//! [`Broadcast`]: tenantry_core::Broadcast

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::{InMemoryBroadcast, InMemoryDistributedCache};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBroadcast, RedisDistributedCache};
