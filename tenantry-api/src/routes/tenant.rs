//! Tenant REST API Routes
//!
//! Thin handlers over the resolver: read a tenant's display snapshot, check
//! its database connection, and trigger invalidation after an administrative
//! change.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tenantry_core::TenantSnapshot;

use crate::{
    error::{ApiError, ApiResult},
    extractors::{ResolvedTenant, TenantPath},
    state::AppState,
    traits::{ConnectionCheck, TenantService},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/tenants/:tenant_id/snapshot - Display attributes
pub async fn get_snapshot(
    State(tenancy): State<Arc<dyn TenantService>>,
    TenantPath(tenant_id): TenantPath,
) -> ApiResult<Json<TenantSnapshot>> {
    let snapshot = tenancy
        .snapshot(&tenant_id)
        .await?
        .ok_or_else(ApiError::tenant_not_found)?;
    Ok(Json(snapshot))
}

/// GET /api/v1/tenants/:tenant_id/connection - Resolve and validate
pub async fn check_connection(
    State(tenancy): State<Arc<dyn TenantService>>,
    TenantPath(tenant_id): TenantPath,
) -> ApiResult<Json<ConnectionCheck>> {
    let check = tenancy.check_connection(&tenant_id).await?;
    Ok(Json(check))
}

/// POST /api/v1/tenants/:tenant_id/invalidate - Drop cached tenant state
///
/// Called by whatever changed the tenant's record, as its last step.
pub async fn invalidate(
    State(tenancy): State<Arc<dyn TenantService>>,
    TenantPath(tenant_id): TenantPath,
) -> ApiResult<impl IntoResponse> {
    tenancy.invalidate(&tenant_id).await?;
    tracing::info!(tenant_id = %tenant_id, "Tenant invalidated via API");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/tenant - The acting tenant named by `X-Tenant-ID`
pub async fn current_tenant(tenant: ResolvedTenant) -> Json<TenantSnapshot> {
    Json(tenant.snapshot)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:tenant_id/snapshot", get(get_snapshot))
        .route("/:tenant_id/connection", get(check_connection))
        .route("/:tenant_id/invalidate", post(invalidate))
}
