//! Subject to tenant pointers.
//!
//! Maps the acting user to the tenant they belong to, with a long TTL in the
//! distributed cache. Pointers are cleared with [`PointerCache::forget`]
//! whenever the association changes; the TTL is only a backstop.

use crate::deadline::bounded;
use crate::keys::KeySpace;
use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{
    DistributedCache, ResolverConfig, SubjectDirectory, SubjectId, TenancyResult, TenantId,
};
use tracing::{debug, warn};

pub struct PointerCache {
    shared: Arc<dyn DistributedCache>,
    keys: KeySpace,
    ttl: Duration,
    cache_timeout: Duration,
    directory_timeout: Duration,
}

impl PointerCache {
    pub fn new(config: &ResolverConfig, shared: Arc<dyn DistributedCache>) -> Self {
        Self {
            shared,
            keys: KeySpace::new(&config.key_prefix),
            ttl: config.pointer_ttl,
            cache_timeout: config.cache_timeout,
            directory_timeout: config.store_timeout,
        }
    }

    /// Tenant the subject belongs to.
    ///
    /// On a miss the directory, if any, is consulted and its answer
    /// remembered. If the distributed cache is unavailable the directory is
    /// asked directly and nothing is written back.
    pub async fn tenant_for(
        &self,
        subject: &SubjectId,
        directory: Option<&dyn SubjectDirectory>,
    ) -> TenancyResult<Option<TenantId>> {
        let key = self.keys.subject(subject);
        let cached = bounded("cache.get", self.cache_timeout, self.shared.get(&key)).await;

        let cache_ok = match cached {
            Ok(Some(raw)) => match TenantId::parse(&raw) {
                Ok(tenant_id) => return Ok(Some(tenant_id)),
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Discarding malformed subject pointer");
                    true
                }
            },
            Ok(None) => true,
            Err(e) if directory.is_some() => {
                warn!(subject = %subject, error = %e, "Pointer cache unavailable; asking directory");
                false
            }
            Err(e) => return Err(e),
        };

        let Some(directory) = directory else {
            return Ok(None);
        };
        let found = bounded(
            "directory.tenant_of",
            self.directory_timeout,
            directory.tenant_of(subject),
        )
        .await?;

        if let (true, Some(tenant_id)) = (cache_ok, &found) {
            if let Err(e) = self.remember(subject, tenant_id).await {
                warn!(subject = %subject, error = %e, "Failed to remember subject pointer");
            }
        }
        Ok(found)
    }

    pub async fn remember(&self, subject: &SubjectId, tenant_id: &TenantId) -> TenancyResult<()> {
        let key = self.keys.subject(subject);
        bounded(
            "cache.set",
            self.cache_timeout,
            self.shared.set(&key, tenant_id.as_str(), self.ttl),
        )
        .await?;
        debug!(subject = %subject, tenant_id = %tenant_id, "Remembered subject pointer");
        Ok(())
    }

    /// Clear the pointer after a re-assignment or departure.
    pub async fn forget(&self, subject: &SubjectId) -> TenancyResult<()> {
        let key = self.keys.subject(subject);
        bounded("cache.del", self.cache_timeout, self.shared.del(&key)).await?;
        debug!(subject = %subject, "Forgot subject pointer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryDistributedCache;
    use tenantry_test_utils::{subject, tenant, FlakyCache, StaticDirectory};

    #[tokio::test]
    async fn test_miss_without_directory_is_none() {
        let cache = PointerCache::new(
            &ResolverConfig::default(),
            Arc::new(InMemoryDistributedCache::new()),
        );
        assert_eq!(cache.tenant_for(&subject("u1"), None).await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_directory_answer_is_remembered() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = PointerCache::new(&ResolverConfig::default(), shared.clone());
        let directory = StaticDirectory::new().with(subject("u1"), tenant("acme"));

        let found = cache
            .tenant_for(&subject("u1"), Some(&directory))
            .await
            .expect("read");
        assert_eq!(found, Some(tenant("acme")));
        assert_eq!(directory.lookups(), 1);

        let again = cache
            .tenant_for(&subject("u1"), Some(&directory))
            .await
            .expect("read");
        assert_eq!(again, Some(tenant("acme")));
        assert_eq!(directory.lookups(), 1);
        assert_eq!(
            shared
                .get("tenantry:subject:u1:tenant")
                .await
                .expect("memory cache")
                .as_deref(),
            Some("acme")
        );
    }

    #[tokio::test]
    async fn test_forget_after_reassignment() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = PointerCache::new(&ResolverConfig::default(), shared);
        cache
            .remember(&subject("u1"), &tenant("acme"))
            .await
            .expect("remember");

        let directory = StaticDirectory::new().with(subject("u1"), tenant("globex"));
        cache.forget(&subject("u1")).await.expect("forget");

        let found = cache
            .tenant_for(&subject("u1"), Some(&directory))
            .await
            .expect("read");
        assert_eq!(found, Some(tenant("globex")));
    }

    #[tokio::test]
    async fn test_unavailable_cache_falls_back_to_directory() {
        let shared = Arc::new(FlakyCache::new());
        shared.set_available(false);
        let cache = PointerCache::new(&ResolverConfig::default(), shared.clone());
        let directory = StaticDirectory::new().with(subject("u1"), tenant("acme"));

        let found = cache
            .tenant_for(&subject("u1"), Some(&directory))
            .await
            .expect("directory answers");
        assert_eq!(found, Some(tenant("acme")));

        let err = cache.tenant_for(&subject("u1"), None).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_pointer_ttl_expires() {
        let config = ResolverConfig::default().with_pointer_ttl(Duration::from_millis(30));
        let cache = PointerCache::new(&config, Arc::new(InMemoryDistributedCache::new()));
        cache
            .remember(&subject("u1"), &tenant("acme"))
            .await
            .expect("remember");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.tenant_for(&subject("u1"), None).await.expect("read"), None);
    }
}
