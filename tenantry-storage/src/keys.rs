//! Distributed cache key layout.
//!
//! Every key lives under a deployment prefix:
//!
//! - `{prefix}:tenant:{tenant_id}:snapshot` holds a serialized [`TenantSnapshot`]
//! - `{prefix}:subject:{subject_id}:tenant` holds a bare tenant id
//!
//! Tenant and subject ids never contain `:`, so keys of different tenants
//! cannot collide.
//!
//! [`TenantSnapshot`]: tenantry_core::TenantSnapshot

use std::sync::Arc;
use tenantry_core::{SubjectId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: Arc<str>,
}

impl KeySpace {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: Arc::from(prefix.as_ref()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn snapshot(&self, tenant_id: &TenantId) -> String {
        format!("{}:tenant:{}:snapshot", self.prefix, tenant_id)
    }

    pub fn subject(&self, subject: &SubjectId) -> String {
        format!("{}:subject:{}:tenant", self.prefix, subject)
    }
}
