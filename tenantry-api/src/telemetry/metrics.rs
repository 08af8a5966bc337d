//! Prometheus Metrics Definitions
//!
//! HTTP request metrics are recorded by the middleware. Resolver metrics
//! mirror the resolver's own counters and are refreshed on every scrape.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use std::sync::Arc;
use tenantry_storage::ResolverStats;

use crate::error::{ApiError, ApiResult};
use crate::traits::TenantService;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TenantryMetrics>> = Lazy::new(TenantryMetrics::new);

fn register_failed(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Container for all Tenantry metrics.
#[derive(Clone)]
pub struct TenantryMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Pool resolves - labels: outcome (hit, miss, joined, failure)
    pub pool_resolves: IntGaugeVec,

    /// Connection lifecycle - labels: event (opened, disposed, dispose_failed, superseded)
    pub pool_connections: IntGaugeVec,

    /// Connections leaving the pool - labels: cause (capacity, idle, explicit)
    pub pool_evictions: IntGaugeVec,

    pub pool_size: IntGauge,
    pub pool_in_flight: IntGauge,
    pub cached_locators: IntGauge,

    /// Snapshot reads - labels: source (near, shared, store, not_found, degraded)
    pub snapshot_reads: IntGaugeVec,

    /// Invalidation traffic - labels: event (published, publish_failed, received,
    /// ignored_own, malformed, reconnect)
    pub invalidations: IntGaugeVec,
}

fn as_gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TenantryMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_int_counter_vec!(
                "tenantry_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tenantry_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_failed("http_request_duration_seconds", e))?,

            pool_resolves: register_int_gauge_vec!(
                "tenantry_pool_resolves",
                "Tenant connection resolves since start, by outcome",
                &["outcome"]
            )
            .map_err(|e| register_failed("pool_resolves", e))?,

            pool_connections: register_int_gauge_vec!(
                "tenantry_pool_connections",
                "Tenant connection lifecycle events since start",
                &["event"]
            )
            .map_err(|e| register_failed("pool_connections", e))?,

            pool_evictions: register_int_gauge_vec!(
                "tenantry_pool_evictions",
                "Tenant connections that left the pool since start, by cause",
                &["cause"]
            )
            .map_err(|e| register_failed("pool_evictions", e))?,

            pool_size: register_int_gauge!(
                "tenantry_pool_size",
                "Tenant connections currently pooled"
            )
            .map_err(|e| register_failed("pool_size", e))?,

            pool_in_flight: register_int_gauge!(
                "tenantry_pool_in_flight",
                "Tenant connection creations currently underway"
            )
            .map_err(|e| register_failed("pool_in_flight", e))?,

            cached_locators: register_int_gauge!(
                "tenantry_cached_locators",
                "Database locators held in process memory"
            )
            .map_err(|e| register_failed("cached_locators", e))?,

            snapshot_reads: register_int_gauge_vec!(
                "tenantry_snapshot_reads",
                "Tenant snapshot reads since start, by source",
                &["source"]
            )
            .map_err(|e| register_failed("snapshot_reads", e))?,

            invalidations: register_int_gauge_vec!(
                "tenantry_invalidations",
                "Invalidation broadcast events since start",
                &["event"]
            )
            .map_err(|e| register_failed("invalidations", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Copy the resolver's counters into the exported gauges.
    pub fn observe_resolver(&self, stats: &ResolverStats) {
        let set = |vec: &IntGaugeVec, label: &str, value: u64| {
            vec.with_label_values(&[label]).set(as_gauge(value));
        };

        let pool = &stats.pool;
        set(&self.pool_resolves, "hit", pool.hits);
        set(&self.pool_resolves, "miss", pool.misses);
        set(&self.pool_resolves, "joined", pool.joined);
        set(&self.pool_resolves, "failure", pool.failures);

        set(&self.pool_connections, "opened", pool.opened);
        set(&self.pool_connections, "disposed", pool.disposed);
        set(&self.pool_connections, "dispose_failed", pool.dispose_failures);
        set(&self.pool_connections, "superseded", pool.superseded);

        set(&self.pool_evictions, "capacity", pool.evicted_capacity);
        set(&self.pool_evictions, "idle", pool.evicted_idle);
        set(&self.pool_evictions, "explicit", pool.removed_explicit);

        self.pool_size.set(as_gauge(stats.pooled_connections));
        self.pool_in_flight.set(as_gauge(stats.in_flight));
        self.cached_locators.set(as_gauge(stats.cached_locators));

        let snapshots = &stats.snapshots;
        set(&self.snapshot_reads, "near", snapshots.near_hits);
        set(&self.snapshot_reads, "shared", snapshots.shared_hits);
        set(&self.snapshot_reads, "store", snapshots.store_reads);
        set(&self.snapshot_reads, "not_found", snapshots.not_found);
        set(&self.snapshot_reads, "degraded", snapshots.degraded);

        let fanout = &stats.fanout;
        set(&self.invalidations, "published", fanout.published);
        set(&self.invalidations, "publish_failed", fanout.publish_failures);
        set(&self.invalidations, "received", fanout.received);
        set(&self.invalidations, "ignored_own", fanout.ignored_own);
        set(&self.invalidations, "malformed", fanout.malformed);
        set(&self.invalidations, "reconnect", fanout.reconnects);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Refreshes resolver gauges, then returns Prometheus text format.
pub async fn metrics_handler(State(tenancy): State<Arc<dyn TenantService>>) -> impl IntoResponse {
    match METRICS.as_ref() {
        Ok(metrics) => metrics.observe_resolver(&tenancy.stats()),
        Err(e) => tracing::error!(error = %e, "Metrics registry unavailable"),
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                b"failed to encode metrics".to_vec(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_storage::PoolStatsSnapshot;

    #[test]
    fn test_observe_resolver_sets_gauges() {
        let metrics = match METRICS.as_ref() {
            Ok(metrics) => metrics,
            Err(e) => panic!("metrics should register: {}", e),
        };
        let stats = ResolverStats {
            pool: PoolStatsSnapshot {
                hits: 7,
                misses: 2,
                opened: 2,
                evicted_idle: 1,
                ..PoolStatsSnapshot::default()
            },
            pooled_connections: 1,
            ..ResolverStats::default()
        };

        metrics.observe_resolver(&stats);

        assert_eq!(metrics.pool_resolves.with_label_values(&["hit"]).get(), 7);
        assert_eq!(metrics.pool_connections.with_label_values(&["opened"]).get(), 2);
        assert_eq!(metrics.pool_evictions.with_label_values(&["idle"]).get(), 1);
        assert_eq!(metrics.pool_size.get(), 1);
    }

    #[test]
    fn test_gauge_saturates() {
        assert_eq!(as_gauge(u64::MAX), i64::MAX);
        assert_eq!(as_gauge(42), 42);
    }
}
