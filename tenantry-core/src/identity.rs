//! Identity types for tenants, subjects and tenant databases

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Longest identifier accepted, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Identifiers are embedded in `:`-separated cache keys, so the separator,
/// whitespace and control characters are rejected.
fn validate_key_segment(field: &str, raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("longer than {} bytes", MAX_IDENTIFIER_LEN),
        });
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| *c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("contains forbidden character {:?}", bad),
        });
    }
    Ok(())
}

/// Opaque tenant identifier, stable for the tenant's lifetime.
///
/// Backed by `Arc<str>`: it is cloned into cache keys, in-flight tables and
/// log fields on every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(Arc<str>);

impl TenantId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = raw.as_ref();
        validate_key_segment("tenant_id", raw)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0.to_string()
    }
}

/// Secondary identifier (the acting user) that maps to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(Arc<str>);

impl SubjectId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = raw.as_ref();
        validate_key_segment("subject_id", raw)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0.to_string()
    }
}

/// Credentials-free name of a tenant database.
///
/// Combined with process-wide connection defaults by the opener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabaseLocator(String);

impl DatabaseLocator {
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "locator".to_string(),
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ValidationError::InvalidValue {
                field: "locator".to_string(),
                reason: "contains control characters".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DatabaseLocator {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatabaseLocator> for String {
    fn from(value: DatabaseLocator) -> Self {
        value.0
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_valid_ids_roundtrip_through_display(raw in "[A-Za-z0-9_.-]{1,128}") {
            let id = TenantId::parse(&raw).expect("generated id is valid");
            prop_assert_eq!(id.to_string(), raw.clone());
            prop_assert_eq!(raw.parse::<TenantId>().expect("parses"), id);
        }

        #[test]
        fn prop_ids_with_separator_rejected(prefix in "[a-z]{0,10}", suffix in "[a-z]{0,10}") {
            let raw = format!("{}:{}", prefix, suffix);
            prop_assert!(TenantId::parse(raw).is_err());
        }
    }
}
