//! Tenantry Core - Tenant Types and Collaborator Seams
//!
//! Pure data structures plus the traits the resolver talks through.
//! Everything else in the workspace depends on this crate; it performs no I/O.

pub mod config;
pub mod error;
pub mod identity;
pub mod snapshot;
pub mod traits;

pub use config::ResolverConfig;
pub use error::{ConfigError, TenancyError, TenancyResult, ValidationError};
pub use identity::{DatabaseLocator, SubjectId, TenantId, MAX_IDENTIFIER_LEN};
pub use snapshot::{TenantRecord, TenantSnapshot, TenantStatus, SNAPSHOT_SCHEMA_VERSION};
pub use traits::{
    Broadcast, ConnectionOpener, DistributedCache, MessageStream, SubjectDirectory,
    TenantMetadataStore,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
