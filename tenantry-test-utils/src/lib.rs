//! Tenantry Test Utilities
//!
//! Shared test infrastructure for the tenantry workspace:
//! - Fake collaborators (opener, metadata store, flaky cache, flaky bus, directory)
//! - Fixtures for common tenants and records
//! - Proptest generators for identifiers
//! - Async assertions

pub use tenantry_core::{
    DatabaseLocator, SubjectId, TenancyError, TenancyResult, TenantId, TenantRecord, TenantStatus,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tenantry_core::{
    Broadcast, ConnectionOpener, DistributedCache, MessageStream, SubjectDirectory,
    TenantMetadataStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// FAKE COLLABORATORS
// ============================================================================

/// Connection produced by [`CountingOpener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConnection {
    pub id: u64,
    pub tenant_id: TenantId,
    pub locator: DatabaseLocator,
}

/// Opener that counts opens and records disposals.
#[derive(Debug, Default)]
pub struct CountingOpener {
    next_id: AtomicU64,
    opened: AtomicUsize,
    disposed: Mutex<Vec<u64>>,
    delay: Mutex<Duration>,
    failure: Mutex<Option<TenancyError>>,
    fail_dispose: AtomicBool,
    fail_validate: AtomicBool,
}

impl CountingOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `open` take this long.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Make every subsequent `open` fail with `failure`, or succeed again with `None`.
    pub fn fail_with(&self, failure: Option<TenancyError>) {
        *lock(&self.failure) = failure;
    }

    /// Make `dispose` report an error (the disposal is still recorded).
    pub fn fail_dispose(&self, fail: bool) {
        self.fail_dispose.store(fail, Ordering::SeqCst);
    }

    /// Make `validate` reject every connection.
    pub fn fail_validate(&self, fail: bool) {
        self.fail_validate.store(fail, Ordering::SeqCst);
    }

    /// Number of `open` invocations, successful or not.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        lock(&self.disposed).len()
    }

    /// Ids of disposed connections, in disposal order.
    pub fn disposed_ids(&self) -> Vec<u64> {
        lock(&self.disposed).clone()
    }
}

#[async_trait]
impl ConnectionOpener for CountingOpener {
    type Connection = FakeConnection;

    async fn open(
        &self,
        tenant_id: &TenantId,
        locator: &DatabaseLocator,
    ) -> TenancyResult<FakeConnection> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        pause(delay).await;

        let failure = lock(&self.failure).clone();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(FakeConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            tenant_id: tenant_id.clone(),
            locator: locator.clone(),
        })
    }

    async fn validate(&self, connection: &FakeConnection) -> TenancyResult<()> {
        if self.fail_validate.load(Ordering::SeqCst) {
            return Err(TenancyError::ConnectionOpenFailed {
                tenant_id: connection.tenant_id.clone(),
                reason: format!("connection {} is broken", connection.id),
            });
        }
        Ok(())
    }

    async fn dispose(&self, connection: Arc<FakeConnection>) -> TenancyResult<()> {
        lock(&self.disposed).push(connection.id);
        if self.fail_dispose.load(Ordering::SeqCst) {
            return Err(TenancyError::store("dispose failed"));
        }
        Ok(())
    }
}

/// Metadata store backed by a map, with knobs for latency and outages.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    records: RwLock<HashMap<TenantId, TenantRecord>>,
    lookups: AtomicUsize,
    delay: Mutex<Duration>,
    unavailable: AtomicBool,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: TenantId, record: TenantRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant_id, record);
    }

    pub fn remove(&self, tenant_id: &TenantId) -> Option<TenantRecord> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant_id)
    }

    /// Change a tenant's display name. Returns false for unknown tenants.
    pub fn rename(&self, tenant_id: &TenantId, name: &str) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(tenant_id) {
            Some(record) => {
                record.name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `find_by_id` calls served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantMetadataStore for InMemoryTenantStore {
    async fn find_by_id(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        pause(delay).await;

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenancyError::store("metadata store offline"));
        }
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned())
    }
}

/// Distributed cache that can be switched off to simulate an outage.
#[derive(Debug)]
pub struct FlakyCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl Default for FlakyCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        let now = Instant::now();
        lock(&self.entries).values().all(|(_, expires)| *expires <= now)
    }

    fn check(&self) -> TenancyResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TenancyError::cache("connection refused"))
        }
    }
}

#[async_trait]
impl DistributedCache for FlakyCache {
    async fn get(&self, key: &str) -> TenancyResult<Option<String>> {
        self.check()?;
        let now = Instant::now();
        Ok(lock(&self.entries)
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TenancyResult<()> {
        self.check()?;
        lock(&self.entries).insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> TenancyResult<()> {
        self.check()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// How a [`FlakyBus`] answers calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Up,
    /// Every call fails immediately.
    Down,
    /// Every call hangs forever.
    Stalled,
}

/// Broadcast bus wrapper that can fail or hang on demand.
pub struct FlakyBus {
    inner: Arc<dyn Broadcast>,
    mode: Mutex<BusMode>,
    failing_subscribes: AtomicUsize,
    publishes: AtomicUsize,
    subscribes: AtomicUsize,
}

impl FlakyBus {
    pub fn new(inner: Arc<dyn Broadcast>) -> Self {
        Self {
            inner,
            mode: Mutex::new(BusMode::Up),
            failing_subscribes: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: BusMode) {
        *lock(&self.mode) = mode;
    }

    /// Fail the next `count` subscribe calls, whatever the mode.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> TenancyResult<()> {
        let mode = *lock(&self.mode);
        match mode {
            BusMode::Up => Ok(()),
            BusMode::Down => Err(TenancyError::cache("broadcast bus unreachable")),
            BusMode::Stalled => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Broadcast for FlakyBus {
    async fn publish(&self, channel: &str, message: &str) -> TenancyResult<()> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> TenancyResult<MessageStream> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TenancyError::cache("subscribe refused"));
        }
        self.gate().await?;
        self.inner.subscribe(channel).await
    }
}

/// Fixed subject to tenant directory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: HashMap<SubjectId, TenantId>,
    lookups: AtomicUsize,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subject: SubjectId, tenant_id: TenantId) -> Self {
        self.entries.insert(subject, tenant_id);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubjectDirectory for StaticDirectory {
    async fn tenant_of(&self, subject: &SubjectId) -> TenancyResult<Option<TenantId>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.get(subject).cloned())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Parse a tenant id, panicking on invalid input.
pub fn tenant(raw: &str) -> TenantId {
    TenantId::parse(raw).expect("fixture tenant id is valid")
}

pub fn subject(raw: &str) -> SubjectId {
    SubjectId::parse(raw).expect("fixture subject id is valid")
}

/// An active tenant record with the given database and display name.
pub fn record(locator: &str, name: &str) -> TenantRecord {
    TenantRecord::new(DatabaseLocator::new(locator).expect("fixture locator is valid"))
        .with_name(name)
        .with_status(TenantStatus::Active)
}

/// A store pre-populated with `(tenant, locator, name)` rows.
pub fn store_with(rows: &[(&str, &str, &str)]) -> Arc<InMemoryTenantStore> {
    let store = InMemoryTenantStore::new();
    for (tenant_id, locator, name) in rows {
        store.insert(tenant(tenant_id), record(locator, name));
    }
    Arc::new(store)
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Valid tenant ids: short, lowercase, never containing the key separator.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        "[a-z][a-z0-9_-]{0,23}".prop_map(|raw| tenant(&raw))
    }

    /// Strings that must be rejected as tenant ids.
    pub fn arb_invalid_tenant_id() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z]{1,8}:[a-z]{1,8}",
            "[a-z]{1,8} [a-z]{1,8}",
            "[a-z]{129,140}",
        ]
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Poll `check` until it holds or `timeout` elapses. Returns the final outcome.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
