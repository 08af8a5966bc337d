//! Tenantry API Server Entry Point
//!
//! Loads configuration, wires the resolver to PostgreSQL and the shared
//! backends, and serves until ctrl-c. Pooled tenant connections are
//! disposed before exit.

use std::sync::Arc;

use tenantry_api::telemetry::{init_tracer, TelemetryConfig};
use tenantry_api::{
    create_router, ApiError, ApiResult, AppState, DbConfig, PgConnectionOpener, PgTenantStore,
    ServiceConfig, SharedBackend,
};
use tenantry_core::ResolverConfig;
use tenantry_storage::{ResolverBuilder, TenantResolver};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let resolver_config = ResolverConfig::from_env();
    let service_config = ServiceConfig::from_env()?;
    let db_config = DbConfig::from_env();

    let store = Arc::new(PgTenantStore::from_config(&db_config)?);
    let opener = Arc::new(PgConnectionOpener::new(db_config.tenant_template_from_env()));

    let builder = TenantResolver::builder(resolver_config, opener, store.clone());
    let (builder, redis_check) = with_shared_backend(builder, &service_config).await?;
    let resolver = Arc::new(builder.build().await?);

    let mut state = AppState::new(resolver.clone()).with_check(store);
    if let Some(check) = redis_check {
        state = state.with_check(check);
    }

    let app = create_router(state);

    let addr = service_config.bind_addr()?;
    tracing::info!(
        %addr,
        instance_id = resolver.instance_id(),
        backend = ?service_config.backend,
        "Starting Tenantry API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    resolver.dispose_all().await;
    tracing::info!("Tenant connections disposed");

    served.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

type Check = Arc<dyn tenantry_api::DependencyCheck>;

#[cfg(feature = "redis")]
async fn with_shared_backend(
    builder: ResolverBuilder<PgConnectionOpener>,
    config: &ServiceConfig,
) -> ApiResult<(ResolverBuilder<PgConnectionOpener>, Option<Check>)> {
    use tenantry_storage::{RedisBroadcast, RedisDistributedCache};

    match (config.backend, config.redis_url.as_deref()) {
        (SharedBackend::Redis, Some(url)) => {
            let cache = Arc::new(RedisDistributedCache::connect(url).await?);
            let bus = Arc::new(RedisBroadcast::connect(url).await?);
            let check: Check = cache.clone();
            Ok((builder.distributed_cache(cache).broadcast(bus), Some(check)))
        }
        (SharedBackend::Redis, None) => Err(ApiError::internal_error(
            "Redis backend selected without TENANTRY_REDIS_URL",
        )),
        (SharedBackend::Memory, _) => Ok((builder, None)),
    }
}

#[cfg(not(feature = "redis"))]
async fn with_shared_backend(
    builder: ResolverBuilder<PgConnectionOpener>,
    config: &ServiceConfig,
) -> ApiResult<(ResolverBuilder<PgConnectionOpener>, Option<Check>)> {
    match config.backend {
        SharedBackend::Memory => Ok((builder, None)),
        SharedBackend::Redis => Err(ApiError::internal_error(
            "Redis backend selected but the redis feature is disabled",
        )),
    }
}
