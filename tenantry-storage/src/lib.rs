//! Tenantry Storage - Tenant Resource and Cache-Consistency Layer
//!
//! Resolves tenant ids to pooled database connections and cached display
//! snapshots, and keeps local caches of many stateless processes consistent
//! through an invalidation broadcast.
//!
//! ```text
//! resolve  -> pool (moka) -> in-flight table -> locator cache -> opener
//! snapshot -> near-cache (moka) -> distributed cache -> metadata store
//! invalidate -> pool + locator + snapshot tiers -> broadcast to peers
//! ```

pub mod backends;
mod deadline;
pub mod fanout;
pub mod keys;
pub mod locator;
pub mod pointer;
pub mod pool;
pub mod resolver;
pub mod snapshot;
pub mod stats;

pub use backends::{InMemoryBroadcast, InMemoryDistributedCache};
#[cfg(feature = "redis")]
pub use backends::{RedisBroadcast, RedisDistributedCache};
pub use fanout::{InvalidationEvent, InvalidationFanout, InvalidationHandler};
pub use keys::KeySpace;
pub use locator::LocatorCache;
pub use pointer::PointerCache;
pub use pool::{Lease, TenantPool};
pub use resolver::{ResolverBuilder, TenantResolver};
pub use snapshot::SnapshotCache;
pub use stats::{
    FanoutStatsSnapshot, PoolStatsSnapshot, ResolverStats, SnapshotStatsSnapshot,
};
