//! Route assembly.

pub mod health;
pub mod tenant;

use axum::{middleware::from_fn, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the full service router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .nest("/tenants", tenant::create_router())
        .route("/tenant", get(tenant::current_tenant));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
