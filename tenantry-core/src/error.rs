//! Error types for tenant resolution

use crate::TenantId;
use std::time::Duration;
use thiserror::Error;

/// Validation errors raised when parsing identifiers and records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for tenant resolution.
///
/// `Clone` so that a single failed creation can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenancyError {
    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("Failed to open connection for tenant {tenant_id}: {reason}")]
    ConnectionOpenFailed { tenant_id: TenantId, reason: String },

    #[error("Tenant metadata store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Distributed cache unavailable: {reason}")]
    CacheUnavailable { reason: String },

    #[error("Operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Tenant pool is closed")]
    PoolClosed,

    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TenancyError {
    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn cache(reason: impl std::fmt::Display) -> Self {
        Self::CacheUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// True for failures of an external dependency rather than of the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::CacheUnavailable { .. }
                | Self::ConnectionOpenFailed { .. }
                | Self::PoolClosed
        )
    }
}

/// Result type alias for tenant resolution.
pub type TenancyResult<T> = Result<T, TenancyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> TenantId {
        TenantId::parse("acme").expect("valid tenant id")
    }

    #[test]
    fn test_tenant_not_found_display() {
        let err = TenancyError::TenantNotFound { tenant_id: acme() };
        let msg = format!("{}", err);
        assert!(msg.contains("Tenant not found"));
        assert!(msg.contains("acme"));
    }

    #[test]
    fn test_timeout_display() {
        let err = TenancyError::timeout("open", Duration::from_millis(1500));
        let msg = format!("{}", err);
        assert!(msg.contains("open"));
        assert!(msg.contains("1.5s"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "pool_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("pool_capacity"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_tenancy_error_from_variants() {
        let validation = TenancyError::from(ValidationError::RequiredFieldMissing {
            field: "tenant_id".to_string(),
        });
        assert!(matches!(validation, TenancyError::InvalidTenantId(_)));

        let config = TenancyError::from(ConfigError::MissingRequired {
            field: "redis_url".to_string(),
        });
        assert!(matches!(config, TenancyError::Config(_)));
    }

    #[test]
    fn test_clone_preserves_equality() {
        let err = TenancyError::ConnectionOpenFailed {
            tenant_id: acme(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_is_unavailable() {
        assert!(TenancyError::store("down").is_unavailable());
        assert!(TenancyError::cache("down").is_unavailable());
        assert!(TenancyError::PoolClosed.is_unavailable());
        assert!(!TenancyError::TenantNotFound { tenant_id: acme() }.is_unavailable());
        assert!(!TenancyError::timeout("store", Duration::from_secs(1)).is_unavailable());
    }
}
