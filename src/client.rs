//! Cloud range client: IP lookups plus the cache refresh coordinator
//!
//! A [`Client`] is cheap to clone and safe to share between tasks; clones
//! share one cache store. There is no process-wide default client: callers
//! construct one and pass it where it is needed.
//!
//! # Refresh protocol
//!
//! A refresh claims the store's single in-process slot, then tries the
//! cheapest source first: a fresh disk snapshot written by a sibling process,
//! then waiting on a sibling's lease marker, then fetching from the provider
//! feeds itself. Lookups against a stale-but-populated cache return the old
//! data immediately and refresh in the background.

use crate::cache::{lease, snapshot, CacheSource, CacheStore};
use crate::cache::lease::LeaseStatus;
use crate::config::Config;
use crate::error::{DetectError, DetectResult};
use crate::providers::{self, RangeFetcher, SubnetRecord};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Client for resolving IPs against published cloud provider ranges
#[derive(Clone)]
pub struct Client {
    config: Config,
    store: Arc<CacheStore>,
    fetchers: Arc<Vec<Box<dyn RangeFetcher>>>,
}

impl Client {
    /// Client with the real Amazon, Google and Microsoft fetchers
    pub fn new(config: Config) -> Self {
        Self::with_fetchers(config, providers::default_fetchers())
    }

    /// Client with caller-supplied fetchers, in lookup tie-break order
    pub fn with_fetchers(config: Config, fetchers: Vec<Box<dyn RangeFetcher>>) -> Self {
        Self {
            config,
            store: Arc::new(CacheStore::new()),
            fetchers: Arc::new(fetchers),
        }
    }

    /// Resolve an IP to the first published range containing it
    ///
    /// An empty cache is refreshed synchronously so a first lookup can never
    /// miss just because nothing was fetched yet. A stale cache is served
    /// as-is while a background refresh runs.
    pub async fn resolve(&self, ip: IpAddr) -> DetectResult<SubnetRecord> {
        let (mut records, write_time) = self.store.snapshot().await;
        let now = Utc::now();

        if records.is_empty() {
            self.refresh_cache().await?;
            (records, _) = self.store.snapshot().await;
        } else if self.is_stale(write_time, now) {
            // Bump first so concurrent lookups don't all spawn refreshes
            self.store.bump_write_time(now).await;
            let background = self.clone();
            tokio::spawn(async move {
                if let Err(e) = background.refresh_cache().await {
                    warn!("Background cache refresh failed: {}", e);
                }
            });
        }

        records
            .iter()
            .find(|record| record.contains(ip))
            .cloned()
            .ok_or(DetectError::NotCloudIp)
    }

    /// Bring the cache up to date, coordinating with sibling processes
    ///
    /// Single-flight per client: a second concurrent call fails fast with
    /// `RefreshInProgress` instead of queueing.
    pub async fn refresh_cache(&self) -> DetectResult<()> {
        self.store.begin_refresh().await?;

        let result = self.run_refresh().await;
        if result.is_err() {
            self.store.abort_refresh().await;
        }
        result
    }

    /// Number of records currently cached, for diagnostics
    pub async fn count(&self) -> usize {
        self.store.count().await
    }

    /// Where the current record set came from
    pub async fn source(&self) -> Option<CacheSource> {
        self.store.source().await
    }

    fn is_stale(&self, write_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match write_time {
            None => true,
            Some(wt) => now
                .signed_duration_since(wt)
                .to_std()
                .is_ok_and(|age| age > self.config.ttl),
        }
    }

    async fn run_refresh(&self) -> DetectResult<()> {
        let Some(path) = self.config.cache_file_path.clone() else {
            // Pure in-memory cache: no snapshot, no lease protocol
            return self.fetch_and_commit(None).await;
        };

        // An abandoned lease is cleared at most once per call; after that the
        // normal wait path applies.
        let mut cleared_stale_lease = false;
        loop {
            let floor = Utc::now()
                .checked_sub_signed(
                    chrono::Duration::from_std(self.config.ttl)
                        .unwrap_or(chrono::Duration::MAX),
                )
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            match snapshot::load(&path, Some(floor)).await {
                Ok((records, mtime)) => {
                    info!("Loaded fresh snapshot from sibling process, skipping web fetch");
                    self.store.commit(records, CacheSource::Disk, mtime).await;
                    return Ok(());
                }
                Err(e) => debug!("Disk snapshot unusable: {}", e),
            }

            let marker = lease::lease_path(&path);
            match lease::status(&marker).await {
                Ok(LeaseStatus::Absent) => {
                    let guard = match lease::acquire(&marker).await {
                        Ok(guard) => Some(guard),
                        Err(e) => {
                            warn!("Could not create lease marker: {}; fetching anyway", e);
                            None
                        }
                    };
                    let result = self.fetch_and_commit(Some(&path)).await;
                    drop(guard);
                    return result;
                }
                Ok(LeaseStatus::Held { age })
                    if !cleared_stale_lease
                        && age.to_std().is_ok_and(|a| a > self.config.ttl) =>
                {
                    info!(
                        "Removing abandoned refresh lease {} (age {})",
                        marker.display(),
                        age
                    );
                    lease::remove(&marker).await?;
                    cleared_stale_lease = true;
                }
                Ok(LeaseStatus::Held { .. }) => {
                    return self.wait_for_lease(&path, &marker).await;
                }
                Err(e) => {
                    warn!("Could not stat lease marker: {}; fetching from web", e);
                    return self.fetch_and_commit(Some(&path)).await;
                }
            }
        }
    }

    /// Poll a sibling's lease until it is released, then adopt its snapshot
    async fn wait_for_lease(&self, snapshot_path: &Path, marker: &Path) -> DetectResult<()> {
        info!(
            "Another process holds the refresh lease; waiting up to {:?}",
            self.config.cache_refresh_timeout
        );
        let deadline = Instant::now() + self.config.cache_refresh_timeout;

        loop {
            tokio::time::sleep(self.config.lease_poll_interval).await;

            match lease::status(marker).await {
                Ok(LeaseStatus::Absent) => {
                    // Holder just finished writing; accept its snapshot at any age
                    return match snapshot::load(snapshot_path, None).await {
                        Ok((records, mtime)) => {
                            self.store.commit(records, CacheSource::Disk, mtime).await;
                            Ok(())
                        }
                        Err(e) => {
                            warn!("Lease released but snapshot unusable: {}; fetching from web", e);
                            self.fetch_and_commit(Some(snapshot_path)).await
                        }
                    };
                }
                Ok(LeaseStatus::Held { .. }) => {
                    if Instant::now() >= deadline {
                        // Holder presumed stuck; take over without touching its
                        // lease, accepting a possible duplicate fetch
                        warn!(
                            "Timed out waiting on refresh lease {}; fetching from web",
                            marker.display()
                        );
                        return self.fetch_and_commit(Some(snapshot_path)).await;
                    }
                }
                Err(e) => {
                    warn!("Lease stat failed while waiting: {}; fetching from web", e);
                    return self.fetch_and_commit(Some(snapshot_path)).await;
                }
            }
        }
    }

    /// Run all fetchers, optionally persist, then commit
    async fn fetch_and_commit(&self, snapshot_path: Option<&Path>) -> DetectResult<()> {
        let records = self.fetch_all().await?;

        if let Some(path) = snapshot_path {
            // In-memory correctness does not depend on persistence succeeding
            if let Err(e) = snapshot::save(path, &records).await {
                warn!("Failed to persist cache snapshot {}: {}", path.display(), e);
            }
        }

        self.store.commit(records, CacheSource::Web, Utc::now()).await;
        Ok(())
    }

    /// Run the fetchers sequentially in order; any failure aborts the refresh
    /// and discards partial results
    async fn fetch_all(&self) -> DetectResult<Vec<SubnetRecord>> {
        let mut records = Vec::new();

        for fetcher in self.fetchers.iter() {
            let batch = fetcher.fetch().await?;
            info!("Fetched {} {} ranges", batch.len(), fetcher.provider());
            records.extend(batch);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(provider: Provider, cidr: &str) -> SubnetRecord {
        SubnetRecord {
            provider,
            region: None,
            subnet: cidr.parse().unwrap(),
        }
    }

    /// Fetcher returning fixed records, counting calls, optionally slow
    struct StaticFetcher {
        provider: Provider,
        records: Vec<SubnetRecord>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl StaticFetcher {
        fn boxed(provider: Provider, cidrs: &[&str]) -> (Box<dyn RangeFetcher>, Arc<AtomicUsize>) {
            Self::boxed_with_delay(provider, cidrs, Duration::ZERO)
        }

        fn boxed_with_delay(
            provider: Provider,
            cidrs: &[&str],
            delay: Duration,
        ) -> (Box<dyn RangeFetcher>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let fetcher = Box::new(Self {
                provider,
                records: cidrs.iter().map(|c| record(provider, c)).collect(),
                calls: Arc::clone(&calls),
                delay,
            });
            (fetcher, calls)
        }
    }

    #[async_trait]
    impl RangeFetcher for StaticFetcher {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.records.clone())
        }
    }

    /// Fetcher that always fails
    struct FailingFetcher;

    #[async_trait]
    impl RangeFetcher for FailingFetcher {
        fn provider(&self) -> Provider {
            Provider::Microsoft
        }

        async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>> {
            Err(DetectError::io(
                "simulated fetch failure",
                std::io::Error::other("boom"),
            ))
        }
    }

    fn quick_config() -> Config {
        Config {
            ttl: Duration::from_secs(60),
            cache_file_path: None,
            cache_refresh_timeout: Duration::from_secs(5),
            lease_poll_interval: Duration::from_millis(25),
        }
    }

    #[tokio::test]
    async fn first_resolve_refreshes_synchronously() {
        let (amazon, calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let client = Client::with_fetchers(quick_config(), vec![amazon]);

        let matched = client.resolve("10.1.2.3".parse().unwrap()).await.unwrap();
        assert_eq!(matched.provider, Provider::Amazon);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.source().await, Some(CacheSource::Web));
        assert_eq!(client.count().await, 1);
    }

    #[tokio::test]
    async fn miss_fails_with_not_cloud_ip() {
        let (amazon, _) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let client = Client::with_fetchers(quick_config(), vec![amazon]);

        let err = client.resolve("127.0.0.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, DetectError::NotCloudIp));
    }

    #[tokio::test]
    async fn overlapping_ranges_resolve_in_fetch_order() {
        let (amazon, _) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let (google, _) = StaticFetcher::boxed(Provider::Google, &["10.0.0.0/8"]);
        let client = Client::with_fetchers(quick_config(), vec![amazon, google]);

        let matched = client.resolve("10.1.2.3".parse().unwrap()).await.unwrap();
        assert_eq!(matched.provider, Provider::Amazon);
    }

    #[tokio::test]
    async fn fetcher_failure_aborts_whole_refresh() {
        let (amazon, _) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let client = Client::with_fetchers(quick_config(), vec![amazon, Box::new(FailingFetcher)]);

        assert!(client.refresh_cache().await.is_err());
        // Partial results were discarded, and the refresh slot was released
        assert_eq!(client.count().await, 0);
        client.store.begin_refresh().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_refresh_is_single_flight() {
        let (amazon, _) = StaticFetcher::boxed_with_delay(
            Provider::Amazon,
            &["10.0.0.0/8"],
            Duration::from_millis(100),
        );
        let client = Client::with_fetchers(quick_config(), vec![amazon]);
        let other = client.clone();

        let (first, second) = tokio::join!(client.refresh_cache(), other.refresh_cache());

        assert!(first.is_ok());
        assert!(matches!(second, Err(DetectError::RefreshInProgress)));
    }

    #[tokio::test]
    async fn stale_cache_serves_old_data_and_refreshes_once() {
        let (amazon, calls) = StaticFetcher::boxed_with_delay(
            Provider::Amazon,
            &["10.0.0.0/8"],
            Duration::from_millis(50),
        );
        let config = Config {
            ttl: Duration::from_millis(10),
            ..quick_config()
        };
        let client = Client::with_fetchers(config, vec![amazon]);

        client.resolve("10.1.2.3".parse().unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Expired but populated: every lookup answers immediately from the
        // stale set, and at most one background refresh is in flight
        let mut lookups = Vec::new();
        for _ in 0..8 {
            let c = client.clone();
            lookups.push(tokio::spawn(async move {
                c.resolve("10.1.2.3".parse().unwrap()).await
            }));
        }
        for lookup in lookups {
            assert!(lookup.await.unwrap().is_ok());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(calls.load(Ordering::SeqCst) <= 2, "refresh storm detected");
    }

    #[tokio::test]
    async fn refresh_persists_snapshot_when_path_configured() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");
        let (amazon, _) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let config = quick_config().with_cache_file(path.clone());
        let client = Client::with_fetchers(config, vec![amazon]);

        client.refresh_cache().await.unwrap();

        assert_eq!(client.source().await, Some(CacheSource::Web));
        let (records, _) = snapshot::load(&path, None).await.unwrap();
        assert_eq!(records.len(), 1);
        // Lease marker was cleaned up
        assert_eq!(
            lease::status(&lease::lease_path(&path)).await.unwrap(),
            LeaseStatus::Absent
        );
    }

    #[tokio::test]
    async fn fresh_snapshot_skips_web_fetch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");
        snapshot::save(&path, &[record(Provider::Google, "35.190.0.0/17")])
            .await
            .unwrap();

        let (amazon, calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let config = quick_config().with_cache_file(path);
        let client = Client::with_fetchers(config, vec![amazon]);

        client.refresh_cache().await.unwrap();

        assert_eq!(client.source().await, Some(CacheSource::Disk));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.count().await, 1);
    }

    #[tokio::test]
    async fn expired_snapshot_falls_back_to_web() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");
        snapshot::save(&path, &[record(Provider::Google, "35.190.0.0/17")])
            .await
            .unwrap();

        let old = std::time::SystemTime::now() - Duration::from_secs(24 * 60 * 60);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        let (amazon, calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let config = quick_config().with_cache_file(path);
        let client = Client::with_fetchers(config, vec![amazon]);

        client.refresh_cache().await.unwrap();

        assert_eq!(client.source().await, Some(CacheSource::Web));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_lease_is_cleared_and_superseded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");
        let marker = lease::lease_path(&path);

        tokio::fs::write(&marker, b"").await.unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(24 * 60 * 60);
        filetime::set_file_mtime(&marker, filetime::FileTime::from_system_time(old)).unwrap();

        let (amazon, calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let config = quick_config().with_cache_file(path.clone());
        let client = Client::with_fetchers(config, vec![amazon]);

        client.refresh_cache().await.unwrap();

        assert_eq!(client.source().await, Some(CacheSource::Web));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lease::status(&marker).await.unwrap(), LeaseStatus::Absent);
        assert!(snapshot::load(&path, None).await.is_ok());
    }

    #[tokio::test]
    async fn second_process_waits_on_lease_and_loads_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");

        let (slow, _) = StaticFetcher::boxed_with_delay(
            Provider::Amazon,
            &["10.0.0.0/8"],
            Duration::from_millis(300),
        );
        let holder = Client::with_fetchers(quick_config().with_cache_file(path.clone()), vec![slow]);

        let (unused, follower_calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let follower =
            Client::with_fetchers(quick_config().with_cache_file(path.clone()), vec![unused]);

        let holder_task = {
            let holder = holder.clone();
            tokio::spawn(async move { holder.refresh_cache().await })
        };

        // Let the holder reach its web fetch and create the lease
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            lease::status(&lease::lease_path(&path)).await.unwrap(),
            LeaseStatus::Held { .. }
        ));

        follower.refresh_cache().await.unwrap();
        holder_task.await.unwrap().unwrap();

        assert_eq!(holder.source().await, Some(CacheSource::Web));
        assert_eq!(follower.source().await, Some(CacheSource::Disk));
        assert_eq!(follower_calls.load(Ordering::SeqCst), 0);
        assert_eq!(holder.count().await, follower.count().await);
    }

    #[tokio::test]
    async fn lease_wait_timeout_takes_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranges.json");
        let marker = lease::lease_path(&path);

        // Fresh lease held by nobody who will ever release it
        tokio::fs::write(&marker, b"").await.unwrap();

        let (amazon, calls) = StaticFetcher::boxed(Provider::Amazon, &["10.0.0.0/8"]);
        let config = Config {
            cache_refresh_timeout: Duration::from_millis(80),
            ..quick_config().with_cache_file(path)
        };
        let client = Client::with_fetchers(config, vec![amazon]);

        client.refresh_cache().await.unwrap();

        assert_eq!(client.source().await, Some(CacheSource::Web));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The stuck holder's lease was left in place
        assert!(matches!(
            lease::status(&marker).await.unwrap(),
            LeaseStatus::Held { .. }
        ));
    }
}
