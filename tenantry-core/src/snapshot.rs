//! Tenant records and the cached display snapshot

use crate::{DatabaseLocator, TenantId, Timestamp, ValidationError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema version written into every cached snapshot.
///
/// Bump when the serialized shape of [`TenantSnapshot`] changes; readers treat
/// any other version as a cache miss.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Archived,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "archived" => Ok(TenantStatus::Archived),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown tenant status '{}'", other),
            }),
        }
    }
}

/// A row of the metadata store, as returned by `find_by_id`.
///
/// Nullable columns stay optional here; defaults are applied once, when the
/// snapshot is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub locator: DatabaseLocator,
    pub name: Option<String>,
    pub logo_ref: Option<String>,
    pub status: Option<TenantStatus>,
    pub plan: Option<String>,
}

impl TenantRecord {
    pub fn new(locator: DatabaseLocator) -> Self {
        Self {
            locator,
            name: None,
            logo_ref: None,
            status: None,
            plan: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_logo_ref(mut self, logo_ref: impl Into<String>) -> Self {
        self.logo_ref = Some(logo_ref.into());
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }
}

/// Immutable projection of a tenant's display attributes.
///
/// Replaced wholesale on refresh, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub schema_version: u32,
    pub tenant_id: TenantId,
    pub name: String,
    pub logo_ref: Option<String>,
    pub status: TenantStatus,
    pub plan: Option<String>,
    pub fetched_at: Timestamp,
}

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: u32,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl TenantSnapshot {
    /// Build a snapshot from a store record, applying defaults.
    ///
    /// A blank name falls back to the tenant id, blank optional fields become
    /// `None` and a missing status means `Active`.
    pub fn from_record(tenant_id: &TenantId, record: &TenantRecord) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            tenant_id: tenant_id.clone(),
            name: non_blank(&record.name).unwrap_or_else(|| tenant_id.to_string()),
            logo_ref: non_blank(&record.logo_ref),
            status: record.status.unwrap_or_default(),
            plan: non_blank(&record.plan),
            fetched_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a cached payload.
    ///
    /// Returns `Ok(None)` when the payload was written under a different
    /// schema version.
    pub fn decode(payload: &str) -> Result<Option<Self>, serde_json::Error> {
        let header: VersionHeader = serde_json::from_str(payload)?;
        if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Ok(None);
        }
        serde_json::from_str(payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> TenantId {
        TenantId::parse("acme").expect("valid")
    }

    fn record() -> TenantRecord {
        TenantRecord::new(DatabaseLocator::new("tenant_acme").expect("valid"))
    }

    #[test]
    fn test_from_record_applies_defaults() {
        let snapshot = TenantSnapshot::from_record(&acme(), &record().with_logo_ref("  "));
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.name, "acme");
        assert_eq!(snapshot.logo_ref, None);
        assert_eq!(snapshot.status, TenantStatus::Active);
        assert_eq!(snapshot.plan, None);
        assert!(snapshot.is_active());
    }

    #[test]
    fn test_from_record_keeps_values() {
        let rec = record()
            .with_name("Acme Inc")
            .with_logo_ref("logos/acme.png")
            .with_status(TenantStatus::Suspended)
            .with_plan("growth");
        let snapshot = TenantSnapshot::from_record(&acme(), &rec);
        assert_eq!(snapshot.name, "Acme Inc");
        assert_eq!(snapshot.logo_ref.as_deref(), Some("logos/acme.png"));
        assert_eq!(snapshot.status, TenantStatus::Suspended);
        assert_eq!(snapshot.plan.as_deref(), Some("growth"));
        assert!(!snapshot.is_active());
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = TenantSnapshot::from_record(&acme(), &record().with_name("Acme Inc"));
        let payload = snapshot.encode().expect("encode");
        assert!(payload.contains("\"status\":\"active\""));
        let decoded = TenantSnapshot::decode(&payload).expect("decode");
        assert_eq!(decoded, Some(snapshot));
    }

    #[test]
    fn test_decode_unknown_schema_version_is_miss() {
        let payload = r#"{"schema_version":99,"tenant_id":"acme","display":"Acme"}"#;
        assert_eq!(TenantSnapshot::decode(payload).expect("header parses"), None);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(TenantSnapshot::decode("not json").is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Active".parse::<TenantStatus>().ok(), Some(TenantStatus::Active));
        assert_eq!(" archived ".parse::<TenantStatus>().ok(), Some(TenantStatus::Archived));
        assert!("deleted".parse::<TenantStatus>().is_err());
    }
}
