//! Property-Based Tests for the Tenant Pool
//!
//! **Single creation:** for any number of concurrent resolves of a cold
//! tenant, exactly one connection is opened and every caller shares it.
//!
//! **Bounded, disposed once:** for any sequence of resolves, invalidations
//! and lease drops, the pool never holds more than its capacity and, after
//! shutdown, every opened connection has been disposed exactly once.
//!
//! **Fresh after invalidate:** a resolve that follows an invalidation never
//! returns the connection pooled before it.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{ResolverConfig, TenantMetadataStore};
use tenantry_storage::{Lease, LocatorCache, TenantPool};
use tenantry_test_utils::{eventually, store_with, tenant, CountingOpener};
use tokio::runtime::Runtime;

const TENANTS: [&str; 4] = ["acme", "globex", "initech", "umbrella"];

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn pool(capacity: u64, opener: &Arc<CountingOpener>) -> Result<TenantPool<CountingOpener>, TestCaseError> {
    let store = store_with(&[
        ("acme", "acme_db", "Acme"),
        ("globex", "globex_db", "Globex"),
        ("initech", "initech_db", "Initech"),
        ("umbrella", "umbrella_db", "Umbrella"),
    ]);
    let config = ResolverConfig::default()
        .with_pool_capacity(capacity)
        .with_maintenance_interval(Duration::from_millis(10));
    let locators = Arc::new(LocatorCache::new(
        store as Arc<dyn TenantMetadataStore>,
        config.store_timeout,
    ));
    TenantPool::new(&config, Arc::clone(opener), locators)
        .map_err(|e| TestCaseError::fail(format!("Failed to build pool: {}", e)))
}

#[derive(Debug, Clone)]
enum Op {
    Resolve(usize),
    ResolveAndHold(usize),
    Invalidate(usize),
    ReleaseHeld,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let tenant_index = 0..TENANTS.len();
    prop_oneof![
        4 => tenant_index.clone().prop_map(Op::Resolve),
        2 => tenant_index.clone().prop_map(Op::ResolveAndHold),
        2 => tenant_index.prop_map(Op::Invalidate),
        1 => Just(Op::ReleaseHeld),
    ]
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_cold_resolves_open_once(callers in 1usize..24, delay_ms in 0u64..20) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let opener = Arc::new(CountingOpener::new().with_delay(Duration::from_millis(delay_ms)));
            let pool = Arc::new(pool(8, &opener)?);
            let acme = tenant("acme");

            let mut handles = Vec::with_capacity(callers);
            for _ in 0..callers {
                let pool = Arc::clone(&pool);
                let acme = acme.clone();
                handles.push(tokio::spawn(async move { pool.resolve(&acme).await }));
            }

            let mut leases: Vec<Lease<CountingOpener>> = Vec::with_capacity(callers);
            for handle in handles {
                let lease = handle
                    .await
                    .map_err(|e| TestCaseError::fail(format!("task panicked: {}", e)))?
                    .map_err(|e| TestCaseError::fail(format!("resolve failed: {}", e)))?;
                leases.push(lease);
            }

            prop_assert_eq!(opener.opened(), 1);
            let first = &leases[0];
            prop_assert!(leases.iter().all(|lease| lease.same_connection(first)));
            prop_assert_eq!(pool.in_flight(), 0);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_pool_bounded_and_disposes_each_connection_once(
        capacity in 1u64..4,
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let opener = Arc::new(CountingOpener::new());
            let pool = pool(capacity, &opener)?;
            let mut held: Vec<Lease<CountingOpener>> = Vec::new();

            for op in ops {
                match op {
                    Op::Resolve(i) => {
                        let lease = pool
                            .resolve(&tenant(TENANTS[i]))
                            .await
                            .map_err(|e| TestCaseError::fail(format!("resolve failed: {}", e)))?;
                        drop(lease);
                    }
                    Op::ResolveAndHold(i) => {
                        let lease = pool
                            .resolve(&tenant(TENANTS[i]))
                            .await
                            .map_err(|e| TestCaseError::fail(format!("resolve failed: {}", e)))?;
                        held.push(lease);
                    }
                    Op::Invalidate(i) => pool.invalidate(&tenant(TENANTS[i])),
                    Op::ReleaseHeld => held.clear(),
                }
                prop_assert!(pool.len() as u64 <= capacity);
            }

            pool.dispose_all().await;
            drop(held);

            let settled = eventually(Duration::from_secs(2), || opener.disposed() == opener.opened()).await;
            prop_assert!(settled, "opened {} but disposed {}", opener.opened(), opener.disposed());

            let disposed = opener.disposed_ids();
            let unique: HashSet<u64> = disposed.iter().copied().collect();
            prop_assert_eq!(unique.len(), disposed.len());
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_resolve_after_invalidate_is_fresh(rounds in 1usize..6, index in 0usize..4) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let opener = Arc::new(CountingOpener::new());
            let pool = pool(4, &opener)?;
            let tenant_id = tenant(TENANTS[index]);
            let mut seen = HashSet::new();

            for _ in 0..rounds {
                let lease = pool
                    .resolve(&tenant_id)
                    .await
                    .map_err(|e| TestCaseError::fail(format!("resolve failed: {}", e)))?;
                prop_assert!(seen.insert(lease.id()), "lease {} served after invalidation", lease.id());
                pool.invalidate(&tenant_id);
            }

            prop_assert_eq!(opener.opened(), rounds);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
