//! Tenant extractors.
//!
//! - `TenantPath` parses a `:tenant_id` path segment into a validated
//!   [`TenantId`].
//! - `ResolvedTenant` reads the `X-Tenant-ID` header and loads the tenant's
//!   snapshot, rejecting unknown tenants with 404.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path},
    http::request::Parts,
};
use std::sync::Arc;
use tenantry_core::{TenantId, TenantSnapshot};

use crate::error::ApiError;
use crate::traits::TenantService;

/// Header carrying the acting tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

fn parse_tenant(raw: &str) -> Result<TenantId, ApiError> {
    TenantId::parse(raw).map_err(|e| ApiError::invalid_input(format!("Invalid tenant id: {}", e)))
}

/// Tenant id taken from the `:tenant_id` path parameter.
///
/// # Example
///
/// ```rust,ignore
/// async fn snapshot(TenantPath(tenant_id): TenantPath) -> ApiResult<Json<TenantSnapshot>> {
///     // tenant_id is already validated
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TenantPath(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for TenantPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid_input(format!("Failed to extract tenant id from path: {}", e)))?;
        Ok(TenantPath(parse_tenant(&raw)?))
    }
}

/// The acting tenant, identified by `X-Tenant-ID` and known to exist.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub tenant_id: TenantId,
    pub snapshot: TenantSnapshot,
}

#[async_trait]
impl<S> FromRequestParts<S> for ResolvedTenant
where
    S: Send + Sync,
    Arc<dyn TenantService>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| ApiError::missing_field("X-Tenant-ID"))?
            .to_str()
            .map_err(|_| ApiError::invalid_input("X-Tenant-ID must be visible ASCII"))?;
        let tenant_id = parse_tenant(raw)?;

        let tenancy = <Arc<dyn TenantService> as FromRef<S>>::from_ref(state);
        let snapshot = tenancy
            .snapshot(&tenant_id)
            .await?
            .ok_or_else(ApiError::tenant_not_found)?;

        Ok(ResolvedTenant { tenant_id, snapshot })
    }
}
