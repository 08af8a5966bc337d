//! PostgreSQL Adapters
//!
//! - [`PgTenantStore`]: the tenant metadata store, read from the control
//!   database's `tenants` table.
//! - [`PgConnectionOpener`]: opens one small deadpool pool per tenant
//!   database. The resolver caches these pools; this module never does.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{
    ConnectionOpener, DatabaseLocator, TenancyError, TenancyResult, TenantId, TenantMetadataStore,
    TenantRecord, TenantStatus,
};
use tokio_postgres::NoTls;

use crate::error::{ApiError, ApiResult};

const FIND_TENANT_SQL: &str =
    "SELECT locator, name, logo_ref, status, plan FROM tenants WHERE id = $1";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection settings.
///
/// Used twice: once for the control database holding tenant records, and
/// once as the template every tenant database connection is derived from
/// (with `dbname` replaced by the tenant's locator).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait and create timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tenantry".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl DbConfig {
    /// Control database configuration from `TENANTRY_DB_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("TENANTRY_DB_HOST", defaults.host),
            port: env_or("TENANTRY_DB_PORT", defaults.port),
            dbname: env_or("TENANTRY_DB_NAME", defaults.dbname),
            user: env_or("TENANTRY_DB_USER", defaults.user),
            password: env_or("TENANTRY_DB_PASSWORD", defaults.password),
            max_size: env_or("TENANTRY_DB_POOL_SIZE", defaults.max_size),
            timeout: Duration::from_secs(env_or("TENANTRY_DB_TIMEOUT", defaults.timeout.as_secs())),
        }
    }

    /// Tenant database template from `TENANTRY_TENANT_DB_*` variables,
    /// falling back to this (control) configuration. Tenant pools default
    /// to four connections each.
    pub fn tenant_template_from_env(&self) -> Self {
        Self {
            host: env_or("TENANTRY_TENANT_DB_HOST", self.host.clone()),
            port: env_or("TENANTRY_TENANT_DB_PORT", self.port),
            dbname: self.dbname.clone(),
            user: env_or("TENANTRY_TENANT_DB_USER", self.user.clone()),
            password: env_or("TENANTRY_TENANT_DB_PASSWORD", self.password.clone()),
            max_size: env_or("TENANTRY_TENANT_DB_POOL_SIZE", 4),
            timeout: Duration::from_secs(env_or(
                "TENANTRY_TENANT_DB_TIMEOUT",
                self.timeout.as_secs(),
            )),
        }
    }

    /// The same settings pointed at another database.
    pub fn for_database(&self, dbname: &str) -> Self {
        Self {
            dbname: dbname.to_string(),
            ..self.clone()
        }
    }

    fn deadpool_config(&self) -> Config {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.timeout);
        pool.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool);
        cfg
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is made until the pool is first used.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        self.deadpool_config()
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))
    }
}

/// Borrow a client and run a trivial query.
async fn ping(pool: &Pool) -> Result<(), String> {
    let client = pool.get().await.map_err(|e| e.to_string())?;
    client
        .simple_query("SELECT 1")
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

// ============================================================================
// TENANT METADATA STORE
// ============================================================================

/// Tenant records from the control database.
#[derive(Clone)]
pub struct PgTenantStore {
    pool: Pool,
}

impl PgTenantStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Round-trip to the control database, for readiness checks.
    pub async fn ping(&self) -> Result<(), String> {
        ping(&self.pool).await
    }
}

fn parse_status(tenant_id: &TenantId, raw: Option<String>) -> Option<TenantStatus> {
    let raw = raw?;
    match raw.parse::<TenantStatus>() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Unknown tenant status; treating as unset");
            None
        }
    }
}

#[async_trait]
impl TenantMetadataStore for PgTenantStore {
    async fn find_by_id(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantRecord>> {
        let client = self.pool.get().await.map_err(TenancyError::store)?;
        let row = client
            .query_opt(FIND_TENANT_SQL, &[&tenant_id.as_str()])
            .await
            .map_err(TenancyError::store)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let locator: String = row.try_get("locator").map_err(TenancyError::store)?;
        let locator = DatabaseLocator::new(locator).map_err(|e| {
            TenancyError::store(format!("tenant {} has an unusable locator: {}", tenant_id, e))
        })?;

        Ok(Some(TenantRecord {
            locator,
            name: row.try_get("name").map_err(TenancyError::store)?,
            logo_ref: row.try_get("logo_ref").map_err(TenancyError::store)?,
            status: parse_status(tenant_id, row.try_get("status").map_err(TenancyError::store)?),
            plan: row.try_get("plan").map_err(TenancyError::store)?,
        }))
    }
}

// ============================================================================
// TENANT CONNECTION OPENER
// ============================================================================

/// Opens a deadpool pool against the tenant's database.
///
/// The "connection" the resolver caches is this per-tenant pool; requests
/// borrow clients from it.
#[derive(Debug, Clone)]
pub struct PgConnectionOpener {
    template: DbConfig,
}

impl PgConnectionOpener {
    pub fn new(template: DbConfig) -> Self {
        Self { template }
    }
}

fn open_failed(tenant_id: &TenantId, reason: impl std::fmt::Display) -> TenancyError {
    TenancyError::ConnectionOpenFailed {
        tenant_id: tenant_id.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ConnectionOpener for PgConnectionOpener {
    type Connection = Pool;

    async fn open(&self, tenant_id: &TenantId, locator: &DatabaseLocator) -> TenancyResult<Pool> {
        let pool = self
            .template
            .for_database(locator.as_str())
            .deadpool_config()
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| open_failed(tenant_id, e))?;

        // Fail here rather than on first use if the database is unreachable.
        if let Err(e) = ping(&pool).await {
            pool.close();
            return Err(open_failed(tenant_id, e));
        }
        tracing::debug!(tenant_id = %tenant_id, max_size = self.template.max_size, "Opened tenant database pool");
        Ok(pool)
    }

    async fn validate(&self, pool: &Pool) -> TenancyResult<()> {
        ping(pool).await.map_err(TenancyError::store)
    }

    async fn dispose(&self, pool: Arc<Pool>) -> TenancyResult<()> {
        pool.close();
        Ok(())
    }
}
