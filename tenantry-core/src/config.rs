//! Resolver configuration
//!
//! All knobs of the pool and the cache layers in one place. Defaults are
//! production values; `from_env` overrides them from `TENANTRY_*` variables.

use crate::ConfigError;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for the tenant resolver and its caches.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Maximum number of open tenant connections held by the pool.
    pub pool_capacity: u64,
    /// A pooled connection unused for this long is evicted (sliding).
    pub idle_ttl: Duration,
    /// How often pending pool expiries are flushed.
    pub maintenance_interval: Duration,
    pub open_timeout: Duration,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    /// TTL of snapshot entries in the distributed cache.
    pub snapshot_ttl: Duration,
    /// TTL of the in-process snapshot near-cache. Zero disables it.
    pub near_cache_ttl: Duration,
    /// TTL of subject -> tenant pointers in the distributed cache.
    pub pointer_ttl: Duration,
    /// Optional expiry for cached locators. `None` keeps them until invalidated.
    pub locator_ttl: Option<Duration>,
    /// Prefix of every distributed cache key and of the default channel.
    pub key_prefix: String,
    /// Broadcast channel override; defaults to `{key_prefix}:tenant-invalidations`.
    pub invalidation_channel: Option<String>,
    /// Upper bound on waiting for disposals during shutdown.
    pub shutdown_timeout: Duration,
    /// Identifies this process as the origin of invalidation events.
    pub instance_id: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 256,
            idle_ttl: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(1),
            open_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            cache_timeout: Duration::from_secs(2),
            snapshot_ttl: Duration::from_secs(5 * 60),
            near_cache_ttl: Duration::from_secs(30),
            pointer_ttl: Duration::from_secs(24 * 60 * 60),
            locator_ttl: None,
            key_prefix: "tenantry".to_string(),
            invalidation_channel: None,
            shutdown_timeout: Duration::from_secs(10),
            instance_id: Uuid::now_v7().to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Durations are read as `*_SECS` or `*_MS` integers. `TENANTRY_LOCATOR_TTL_SECS=0`
    /// (or unset) keeps locators until invalidated.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            pool_capacity: env_parse("TENANTRY_POOL_CAPACITY").unwrap_or(defaults.pool_capacity),
            idle_ttl: env_secs("TENANTRY_POOL_IDLE_TTL_SECS").unwrap_or(defaults.idle_ttl),
            maintenance_interval: env_millis("TENANTRY_POOL_MAINTENANCE_INTERVAL_MS")
                .unwrap_or(defaults.maintenance_interval),
            open_timeout: env_millis("TENANTRY_OPEN_TIMEOUT_MS").unwrap_or(defaults.open_timeout),
            store_timeout: env_millis("TENANTRY_STORE_TIMEOUT_MS")
                .unwrap_or(defaults.store_timeout),
            cache_timeout: env_millis("TENANTRY_CACHE_TIMEOUT_MS")
                .unwrap_or(defaults.cache_timeout),
            snapshot_ttl: env_secs("TENANTRY_SNAPSHOT_TTL_SECS").unwrap_or(defaults.snapshot_ttl),
            near_cache_ttl: env_secs("TENANTRY_NEAR_CACHE_TTL_SECS")
                .unwrap_or(defaults.near_cache_ttl),
            pointer_ttl: env_secs("TENANTRY_POINTER_TTL_SECS").unwrap_or(defaults.pointer_ttl),
            locator_ttl: env_secs("TENANTRY_LOCATOR_TTL_SECS")
                .filter(|ttl| !ttl.is_zero())
                .or(defaults.locator_ttl),
            key_prefix: std::env::var("TENANTRY_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            invalidation_channel: std::env::var("TENANTRY_INVALIDATION_CHANNEL")
                .ok()
                .or(defaults.invalidation_channel),
            shutdown_timeout: env_millis("TENANTRY_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout),
            instance_id: std::env::var("TENANTRY_INSTANCE_ID").unwrap_or(defaults.instance_id),
        }
    }

    pub fn with_pool_capacity(mut self, capacity: u64) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    pub fn with_near_cache_ttl(mut self, ttl: Duration) -> Self {
        self.near_cache_ttl = ttl;
        self
    }

    pub fn with_pointer_ttl(mut self, ttl: Duration) -> Self {
        self.pointer_ttl = ttl;
        self
    }

    pub fn with_locator_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.locator_ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The broadcast channel invalidation events travel on.
    pub fn invalidation_channel(&self) -> String {
        self.invalidation_channel
            .clone()
            .unwrap_or_else(|| format!("{}:tenant-invalidations", self.key_prefix))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(invalid(
                "pool_capacity",
                self.pool_capacity,
                "pool_capacity must be greater than 0",
            ));
        }

        let positive = [
            ("idle_ttl", self.idle_ttl),
            ("maintenance_interval", self.maintenance_interval),
            ("open_timeout", self.open_timeout),
            ("store_timeout", self.store_timeout),
            ("cache_timeout", self.cache_timeout),
            ("snapshot_ttl", self.snapshot_ttl),
            ("pointer_ttl", self.pointer_ttl),
            ("shutdown_timeout", self.shutdown_timeout),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(invalid(field, "0", "duration must be greater than 0"));
            }
        }

        if let Some(ttl) = self.locator_ttl {
            if ttl.is_zero() {
                return Err(invalid(
                    "locator_ttl",
                    "0",
                    "use None to disable locator expiry",
                ));
            }
        }

        if self.near_cache_ttl > self.snapshot_ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("near_cache_ttl={:?}", self.near_cache_ttl),
                option_b: format!("snapshot_ttl={:?}", self.snapshot_ttl),
            });
        }

        if self.key_prefix.is_empty()
            || self
                .key_prefix
                .chars()
                .any(|c| c == ':' || c.is_whitespace())
        {
            return Err(invalid(
                "key_prefix",
                &self.key_prefix,
                "key_prefix must be non-empty and contain no ':' or whitespace",
            ));
        }

        if let Some(channel) = &self.invalidation_channel {
            if channel.trim().is_empty() {
                return Err(invalid(
                    "invalidation_channel",
                    channel,
                    "invalidation_channel must not be blank",
                ));
            }
        }

        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "instance_id".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.maintenance_interval, Duration::from_secs(1));
        assert_eq!(config.near_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.snapshot_ttl, Duration::from_secs(300));
        assert_eq!(config.pointer_ttl, Duration::from_secs(86_400));
        assert_eq!(config.locator_ttl, None);
    }

    #[test]
    fn test_default_channel_uses_prefix() {
        let config = ResolverConfig::default().with_key_prefix("acmeplat");
        assert_eq!(config.invalidation_channel(), "acmeplat:tenant-invalidations");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ResolverConfig::default()
            .with_pool_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "pool_capacity"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ResolverConfig::default()
            .with_open_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "open_timeout"));
    }

    #[test]
    fn test_near_cache_may_be_disabled() {
        let config = ResolverConfig::default().with_near_cache_ttl(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_near_cache_longer_than_snapshot_rejected() {
        let err = ResolverConfig::default()
            .with_near_cache_ttl(Duration::from_secs(600))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_prefix_with_separator_rejected() {
        let err = ResolverConfig::default()
            .with_key_prefix("a:b")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "key_prefix"));
    }

    #[test]
    fn test_zero_locator_ttl_rejected() {
        let err = ResolverConfig::default()
            .with_locator_ttl(Some(Duration::ZERO))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "locator_ttl"));
    }

    #[test]
    fn test_instance_ids_are_unique_per_default() {
        assert_ne!(
            ResolverConfig::default().instance_id,
            ResolverConfig::default().instance_id
        );
    }
}
