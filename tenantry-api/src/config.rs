//! Service Configuration Module
//!
//! Where the service listens and which shared backends it uses. Resolver
//! tuning lives in [`tenantry_core::ResolverConfig`]; database settings in
//! [`crate::db::DbConfig`].

use std::net::SocketAddr;
use std::str::FromStr;
use tenantry_core::ConfigError;

/// Which implementation backs the distributed cache and the broadcast bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharedBackend {
    /// In-process backends. Correct for a single instance only.
    #[default]
    Memory,
    /// Redis for both the cache and pub/sub.
    Redis,
}

impl FromStr for SharedBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
                reason: "expected 'memory' or 'redis'".to_string(),
            }),
        }
    }
}

/// HTTP service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Interface to bind.
    pub host: String,
    pub port: u16,
    pub backend: SharedBackend,
    /// Required when `backend` is Redis.
    pub redis_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            backend: SharedBackend::Memory,
            redis_url: None,
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_API_BIND`: Interface to bind (default: 0.0.0.0)
    /// - `PORT` or `TENANTRY_API_PORT`: Port (default: 3000)
    /// - `TENANTRY_BACKEND`: "memory" or "redis" (default: memory)
    /// - `TENANTRY_REDIS_URL`: Redis connection URL
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("TENANTRY_API_PORT").ok())
        {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "port".to_string(),
                value: raw.clone(),
                reason: "must be a valid port number".to_string(),
            })?,
            None => defaults.port,
        };

        let backend = match std::env::var("TENANTRY_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backend,
        };

        let config = Self {
            host: std::env::var("TENANTRY_API_BIND").unwrap_or(defaults.host),
            port,
            backend,
            redis_url: std::env::var("TENANTRY_REDIS_URL").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == SharedBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "TENANTRY_REDIS_URL".to_string(),
            });
        }
        self.bind_addr().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "bind".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_single_instance() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, SharedBackend::Memory);
        assert_eq!(config.bind_addr().map(|a| a.port()), Ok(3000));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let config = ServiceConfig {
            backend: SharedBackend::Redis,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));

        let config = ServiceConfig {
            backend: SharedBackend::Redis,
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("Redis".parse::<SharedBackend>(), Ok(SharedBackend::Redis));
        assert_eq!("in-memory".parse::<SharedBackend>(), Ok(SharedBackend::Memory));
        assert!("memcached".parse::<SharedBackend>().is_err());
    }

    #[test]
    fn test_invalid_host_rejected() {
        let config = ServiceConfig {
            host: "not a host".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
