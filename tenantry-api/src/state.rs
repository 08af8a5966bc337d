//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use crate::traits::{DependencyCheck, TenantService};

/// Dependencies checked by `/health/ready`.
pub type DependencyChecks = Arc<Vec<Arc<dyn DependencyCheck>>>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// The process's tenant resolver.
    pub tenancy: Arc<dyn TenantService>,
    pub checks: DependencyChecks,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(tenancy: Arc<dyn TenantService>) -> Self {
        Self {
            tenancy,
            checks: Arc::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn DependencyCheck>) -> Self {
        Arc::make_mut(&mut self.checks).push(check);
        self
    }
}

crate::impl_from_ref!(Arc<dyn TenantService>, tenancy);
crate::impl_from_ref!(DependencyChecks, checks);
crate::impl_from_ref!(Instant, start_time);
