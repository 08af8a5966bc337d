//! Request extractors.

mod tenant;

pub use tenant::{ResolvedTenant, TenantPath, TENANT_HEADER};
