//! TTL cache of merged identity mappings
//!
//! A snapshot is built from the aws-auth source and the access-entry source
//! and published as a fresh `Arc` once both reads have finished. Readers
//! only ever see complete snapshots; a refresh that is dropped or fails
//! leaves the previous snapshot and its expiry in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eksbridge_common::{Error, DEFAULT_CACHE_TTL_SECS};
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::mappings::{IdentityMappings, MappingSource};
use crate::Result;

/// Default snapshot lifetime
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(DEFAULT_CACHE_TTL_SECS);

/// Read-only lookups of the principals behind Kubernetes identities
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Principal ARNs mapped to a Kubernetes username
    async fn lookup_by_username(&self, username: &str) -> Result<Vec<String>>;

    /// Principal ARNs mapped into a Kubernetes group
    async fn lookup_by_group(&self, group: &str) -> Result<Vec<String>>;
}

/// When the published snapshot must be reloaded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expiry {
    /// Nothing loaded yet
    Stale,
    At(Instant),
    /// The TTL reaches past what an `Instant` can hold
    Never,
}

impl Expiry {
    fn after(ttl: Duration) -> Self {
        Instant::now().checked_add(ttl).map_or(Expiry::Never, Expiry::At)
    }
}

struct CacheState {
    snapshot: Arc<IdentityMappings>,
    expiry: Expiry,
}

impl CacheState {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.expiry {
            Expiry::Stale => false,
            Expiry::At(at) => now < at,
            Expiry::Never => true,
        }
    }
}

/// Identity mappings merged from both sources, refreshed on demand
pub struct IdentityCache {
    bootstrap: Arc<dyn MappingSource>,
    access_entries: Arc<dyn MappingSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl IdentityCache {
    /// Create an empty cache; the first lookup loads it
    pub fn new(
        bootstrap: Arc<dyn MappingSource>,
        access_entries: Arc<dyn MappingSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            bootstrap,
            access_entries,
            ttl,
            state: Mutex::new(CacheState {
                snapshot: Arc::new(IdentityMappings::default()),
                expiry: Expiry::Stale,
            }),
        }
    }

    /// Snapshot lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reload both sources if the snapshot is missing or expired
    ///
    /// The lock is held for the whole check-and-load, so concurrent callers
    /// that find the snapshot expired wait for one refresh instead of each
    /// starting their own.
    pub async fn refresh_if_expired(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_fresh(Instant::now()) {
            return Ok(());
        }

        let merged = self.load().await?;
        debug!(
            users = merged.users.len(),
            groups = merged.groups.len(),
            ttl_secs = self.ttl.as_secs(),
            "refreshed identity mappings"
        );
        state.snapshot = Arc::new(merged);
        state.expiry = Expiry::after(self.ttl);
        Ok(())
    }

    async fn load(&self) -> Result<IdentityMappings> {
        let (bootstrap, entries) = tokio::join!(
            self.bootstrap.read_mappings(),
            self.access_entries.read_mappings()
        );

        match (bootstrap, entries) {
            (Ok(mut merged), Ok(entries)) => {
                merged.merge(entries);
                Ok(merged)
            }
            (Ok(merged), Err(e)) => {
                warn!(source = self.access_entries.name(), error = %e, "identity source unavailable, using the other");
                Ok(merged)
            }
            (Err(e), Ok(entries)) => {
                warn!(source = self.bootstrap.name(), error = %e, "identity source unavailable, using the other");
                Ok(entries)
            }
            (Err(bootstrap), Err(access_entries)) => Err(Error::MappingSourcesUnavailable {
                bootstrap: Box::new(bootstrap),
                access_entries: Box::new(access_entries),
            }),
        }
    }

    /// Current snapshot, refreshed first if expired
    pub async fn snapshot(&self) -> Result<Arc<IdentityMappings>> {
        self.refresh_if_expired().await?;
        Ok(self.cached_snapshot().await)
    }

    /// Last published snapshot, without refreshing
    pub async fn cached_snapshot(&self) -> Arc<IdentityMappings> {
        self.state.lock().await.snapshot.clone()
    }
}

#[async_trait]
impl IdentityLookup for IdentityCache {
    async fn lookup_by_username(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.principals_for_username(username).to_vec())
    }

    async fn lookup_by_group(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.principals_for_group(group).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const ALICE: &str = "arn:aws:iam::123456789012:user/alice";
    const BOB: &str = "arn:aws:iam::123456789012:user/bob";
    const TTL: Duration = Duration::from_secs(300);

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    /// Source that counts reads, takes `delay` to answer and can be switched off
    struct CountingSource {
        name: &'static str,
        mappings: IdentityMappings,
        delay: Duration,
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl CountingSource {
        fn new(name: &'static str, principal: &str, group: &str) -> Arc<Self> {
            let mut mappings = IdentityMappings::default();
            mappings.record(principal, None, &[group.to_string()]);
            Arc::new(Self {
                name,
                mappings,
                delay: Duration::from_millis(50),
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MappingSource for CountingSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn read_mappings(&self) -> Result<IdentityMappings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::upstream(self.name, "unavailable"));
            }
            Ok(self.mappings.clone())
        }
    }

    fn cache_with(
        bootstrap: &Arc<CountingSource>,
        entries: &Arc<CountingSource>,
    ) -> IdentityCache {
        IdentityCache::new(bootstrap.clone(), entries.clone(), TTL)
    }

    fn sources() -> (Arc<CountingSource>, Arc<CountingSource>) {
        (
            CountingSource::new("aws-auth", ALICE, "readers"),
            CountingSource::new("access-entries", BOB, "readers"),
        )
    }

    // =========================================================================
    // TTL Stories
    // =========================================================================

    /// Story: lookups inside the TTL never reach the sources
    #[tokio::test(start_paused = true)]
    async fn story_lookups_within_ttl_hit_the_snapshot() {
        let (bootstrap, entries) = sources();
        let cache = cache_with(&bootstrap, &entries);

        for _ in 0..3 {
            cache.lookup_by_group("readers").await.unwrap();
        }
        assert_eq!((bootstrap.calls(), entries.calls()), (1, 1));

        tokio::time::advance(Duration::from_secs(290)).await;
        cache.lookup_by_username(ALICE).await.unwrap();
        assert_eq!((bootstrap.calls(), entries.calls()), (1, 1));

        tokio::time::advance(Duration::from_secs(20)).await;
        cache.lookup_by_username(ALICE).await.unwrap();
        assert_eq!((bootstrap.calls(), entries.calls()), (2, 2));
    }

    /// Story: concurrent lookups after expiry trigger exactly one refresh
    #[tokio::test(start_paused = true)]
    async fn story_concurrent_lookups_share_one_refresh() {
        let (bootstrap, entries) = sources();
        let cache = cache_with(&bootstrap, &entries);
        cache.refresh_if_expired().await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let lookups = (0..16).map(|_| cache.lookup_by_group("readers"));
        let results = futures::future::join_all(lookups).await;

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|p| p.len() == 2)));
        assert_eq!((bootstrap.calls(), entries.calls()), (2, 2));
    }

    // =========================================================================
    // Merge and Failure Stories
    // =========================================================================

    /// Story: bootstrap principals come first in the merged snapshot
    #[tokio::test(start_paused = true)]
    async fn story_merge_keeps_bootstrap_first() {
        let (bootstrap, entries) = sources();
        let cache = cache_with(&bootstrap, &entries);

        let readers = cache.lookup_by_group("readers").await.unwrap();
        assert_eq!(readers, vec![ALICE.to_string(), BOB.to_string()]);
        assert!(cache.lookup_by_group("admins").await.unwrap().is_empty());
    }

    /// Story: one failing source degrades to the other
    #[tokio::test(start_paused = true)]
    async fn story_one_failing_source_is_tolerated() {
        let (bootstrap, entries) = sources();
        bootstrap.fail(true);
        let cache = cache_with(&bootstrap, &entries);

        let readers = cache.lookup_by_group("readers").await.unwrap();
        assert_eq!(readers, vec![BOB.to_string()]);
    }

    /// Story: both sources failing keeps the old snapshot and retries next call
    #[tokio::test(start_paused = true)]
    async fn story_both_sources_failing_keeps_previous_snapshot() {
        let (bootstrap, entries) = sources();
        let cache = cache_with(&bootstrap, &entries);
        cache.refresh_if_expired().await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        bootstrap.fail(true);
        entries.fail(true);

        let err = cache.lookup_by_group("readers").await.unwrap_err();
        assert!(matches!(err, Error::MappingSourcesUnavailable { .. }));
        assert_eq!(cache.cached_snapshot().await.principals_for_group("readers").len(), 2);

        // expiry was not pushed out, so the next call tries again
        assert!(cache.refresh_if_expired().await.is_err());
        assert_eq!((bootstrap.calls(), entries.calls()), (3, 3));

        bootstrap.fail(false);
        entries.fail(false);
        cache.refresh_if_expired().await.unwrap();
        assert_eq!((bootstrap.calls(), entries.calls()), (4, 4));
    }

    /// Story: both sources failing on the first load leaves the snapshot
    /// empty and unloaded, so the next call tries again at once
    #[tokio::test(start_paused = true)]
    async fn story_both_sources_failing_on_first_load_keeps_empty_snapshot() {
        let (bootstrap, entries) = sources();
        bootstrap.fail(true);
        entries.fail(true);
        let cache = cache_with(&bootstrap, &entries);

        let err = cache.lookup_by_username(ALICE).await.unwrap_err();
        assert!(matches!(err, Error::MappingSourcesUnavailable { .. }));
        assert!(cache.cached_snapshot().await.is_empty());

        let err = cache.refresh_if_expired().await.unwrap_err();
        assert!(matches!(err, Error::MappingSourcesUnavailable { .. }));
        assert_eq!((bootstrap.calls(), entries.calls()), (2, 2));

        bootstrap.fail(false);
        let users = cache.lookup_by_username(ALICE).await.unwrap();
        assert_eq!(users, vec![ALICE.to_string()]);
        assert_eq!((bootstrap.calls(), entries.calls()), (3, 3));
    }

    /// Story: a TTL too long for the clock never expires instead of panicking
    #[tokio::test(start_paused = true)]
    async fn story_unrepresentable_ttl_never_expires() {
        let (bootstrap, entries) = sources();
        let cache = IdentityCache::new(bootstrap.clone(), entries.clone(), Duration::MAX);

        cache.lookup_by_group("readers").await.unwrap();
        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 3600)).await;
        cache.lookup_by_group("readers").await.unwrap();
        assert_eq!((bootstrap.calls(), entries.calls()), (1, 1));
    }

    /// Story: a refresh dropped mid-flight publishes nothing
    #[tokio::test(start_paused = true)]
    async fn story_cancelled_refresh_publishes_nothing() {
        let (bootstrap, entries) = sources();
        let cache = cache_with(&bootstrap, &entries);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.refresh_if_expired()).await;
        assert!(timed_out.is_err());
        assert!(cache.cached_snapshot().await.is_empty());

        // still expired: the next call loads
        cache.refresh_if_expired().await.unwrap();
        assert!(!cache.cached_snapshot().await.is_empty());
        assert_eq!(bootstrap.calls(), 2);
    }

    #[tokio::test]
    async fn test_mocked_sources_are_merged() {
        let mut bootstrap = crate::mappings::MockMappingSource::new();
        bootstrap.expect_name().return_const("aws-auth");
        bootstrap.expect_read_mappings().times(1).returning(|| {
            let mut m = IdentityMappings::default();
            m.record(ALICE, Some("alice"), &[]);
            Ok(m)
        });
        let mut entries = crate::mappings::MockMappingSource::new();
        entries.expect_name().return_const("access-entries");
        entries
            .expect_read_mappings()
            .times(1)
            .returning(|| Err(Error::upstream("list access entries", "throttled")));

        let cache = IdentityCache::new(Arc::new(bootstrap), Arc::new(entries), DEFAULT_IDENTITY_TTL);
        assert_eq!(
            cache.lookup_by_username("alice").await.unwrap(),
            vec![ALICE.to_string()]
        );
        assert_eq!(cache.ttl(), Duration::from_secs(300));
    }
}
