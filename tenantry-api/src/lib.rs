//! Tenantry API - HTTP Service Shell
//!
//! Exposes the tenant resolver over REST: display snapshots, connection
//! checks and invalidation, plus health and Prometheus endpoints. The
//! PostgreSQL adapters for the metadata store and tenant databases live
//! here; the resolver itself lives in `tenantry-storage`.

#[macro_use]
pub mod macros;

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod traits;

pub use config::{ServiceConfig, SharedBackend};
pub use db::{DbConfig, PgConnectionOpener, PgTenantStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{ResolvedTenant, TenantPath, TENANT_HEADER};
pub use routes::create_router;
pub use state::{AppState, DependencyChecks};
pub use traits::{ConnectionCheck, DependencyCheck, TenantService};
