//! API Channel Demultiplexer
//!
//! Maps a logical service target onto one cached channel per live host.
//! Channels are created lazily on first use and evicted when the service
//! directory reports their host gone.
//!
//! All cache mutations serialize on a single mutex. Channel construction
//! happens under that mutex, so a host never has two cached channels, and
//! eviction removes and closes a channel under the same lock, so the cache
//! never hands out a closed channel and a host never has two open ones.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tenantmesh_core::{Error, Result};

use crate::channel::{ApiChannel, ChannelFactory};
use crate::directory::{HostChange, HostChangeStream, ServiceDirectory};

/// Cached channels plus the stopped flag, guarded together
struct ChannelCache<C> {
    channels: HashMap<String, Arc<C>>,
    stopped: bool,
}

/// Demultiplexes calls for one target service across its hosts
pub struct ApiChannelDemux<C: ApiChannel> {
    target: String,
    factory: Arc<dyn ChannelFactory<C>>,
    directory: Arc<dyn ServiceDirectory>,
    cache: Mutex<ChannelCache<C>>,
    next_host: AtomicUsize,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ApiChannel> std::fmt::Debug for ApiChannelDemux<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiChannelDemux")
            .field("target", &self.target)
            .field("cached_hosts", &self.cached_hosts())
            .finish()
    }
}

impl<C: ApiChannel> ApiChannelDemux<C> {
    pub fn new(
        target: impl Into<String>,
        factory: Arc<dyn ChannelFactory<C>>,
        directory: Arc<dyn ServiceDirectory>,
    ) -> Self {
        Self {
            target: target.into(),
            factory,
            directory,
            cache: Mutex::new(ChannelCache {
                channels: HashMap::new(),
                stopped: false,
            }),
            next_host: AtomicUsize::new(0),
            watcher: Mutex::new(None),
        }
    }

    /// Service type this demux routes for
    pub fn target_identifier(&self) -> &str {
        &self.target
    }

    fn lock_cache(&self) -> MutexGuard<'_, ChannelCache<C>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stopped_error(&self) -> Error {
        Error::Channel(format!("Channel demux for '{}' is shut down", self.target))
    }

    /// Channel for `host`, creating and caching one if needed.
    ///
    /// A failed construction leaves the cache untouched, so the next call
    /// for the same host tries again. Fails with `Error::Channel` once the
    /// demux is shut down.
    pub fn resolve_channel(&self, host: &str) -> Result<Arc<C>> {
        let mut cache = self.lock_cache();
        if cache.stopped {
            return Err(self.stopped_error());
        }
        if let Some(channel) = cache.channels.get(host) {
            return Ok(channel.clone());
        }

        let channel = self
            .factory
            .create_channel(host)
            .map_err(|e| match e {
                Error::ChannelCreation { .. } => e,
                other => Error::ChannelCreation {
                    host: host.to_string(),
                    reason: other.to_string(),
                },
            })?;
        let channel = Arc::new(channel);
        cache.channels.insert(host.to_string(), channel.clone());
        debug!("Created channel to {} for '{}'", host, self.target);
        Ok(channel)
    }

    /// Channel for the next registered host, rotating across hosts
    pub async fn next_channel(&self) -> Result<Arc<C>> {
        if self.lock_cache().stopped {
            return Err(self.stopped_error());
        }
        let hosts = self.directory.hosts(&self.target).await?;
        if hosts.is_empty() {
            return Err(Error::NoAvailableHosts(self.target.clone()));
        }
        let index = self.next_host.fetch_add(1, Ordering::Relaxed) % hosts.len();
        self.resolve_channel(&hosts[index])
    }

    /// Remove and close the channel for `host`. Returns whether one was cached.
    pub fn evict(&self, host: &str) -> bool {
        let mut cache = self.lock_cache();
        match cache.channels.remove(host) {
            Some(channel) => {
                channel.close();
                drop(cache);
                info!("Closed channel to {} for '{}'", host, self.target);
                true
            }
            None => false,
        }
    }

    /// Hosts with a cached channel, sorted
    pub fn cached_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.lock_cache().channels.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Start following the service directory.
    ///
    /// Cached channels whose host is no longer registered are evicted
    /// immediately; later removals are evicted as the directory reports
    /// them. Added hosts get no channel until first requested.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.lock_cache().stopped {
            return Err(self.stopped_error());
        }
        let changes = self.directory.watch(&self.target).await?;

        let registered = self.directory.hosts(&self.target).await?;
        for host in self.cached_hosts() {
            if !registered.contains(&host) {
                self.evict(&host);
            }
        }

        let handle = tokio::spawn(follow_directory(Arc::downgrade(self), changes));
        if let Some(previous) = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle)
        {
            previous.abort();
        }

        info!("Channel demux for '{}' started", self.target);
        Ok(())
    }

    /// Stop following the directory and close every cached channel.
    ///
    /// The demux stays stopped: later calls fail with `Error::Channel`.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }

        let closed = {
            let mut cache = self.lock_cache();
            cache.stopped = true;
            let drained: Vec<Arc<C>> = cache.channels.drain().map(|(_, c)| c).collect();
            for channel in &drained {
                channel.close();
            }
            drained.len()
        };
        info!(
            "Channel demux for '{}' stopped, closed {} channels",
            self.target, closed
        );
    }
}

async fn follow_directory<C: ApiChannel>(demux: Weak<ApiChannelDemux<C>>, mut changes: HostChangeStream) {
    while let Some(change) = changes.next().await {
        let Some(demux) = demux.upgrade() else {
            break;
        };
        match change {
            Ok(HostChange::Removed(host)) => {
                debug!("Host {} left '{}'", host, demux.target);
                demux.evict(&host);
            }
            Ok(HostChange::Added(host)) => {
                debug!("Host {} joined '{}'", host, demux.target);
            }
            Err(e) => warn!("Service directory error for '{}': {}", demux.target, e),
        }
    }
    debug!("Service directory stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StoreServiceDirectory;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tenantmesh_core::{MemoryCoordinationStore, NodePath};

    const TARGET: &str = "tenant-management";

    #[derive(Debug)]
    struct TestChannel {
        host: String,
        closed: AtomicBool,
    }

    impl TestChannel {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ApiChannel for TestChannel {
        fn host(&self) -> &str {
            &self.host
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        demux: Arc<ApiChannelDemux<TestChannel>>,
        directory: Arc<StoreServiceDirectory>,
        created: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let directory = Arc::new(StoreServiceDirectory::new(
            Arc::new(MemoryCoordinationStore::new()),
            NodePath::parse("/tenantmesh/services").unwrap(),
        ));
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let factory = move |host: &str| -> Result<TestChannel> {
            if host == "bad-host" {
                return Err(Error::Internal("unreachable".to_string()));
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TestChannel {
                host: host.to_string(),
                closed: AtomicBool::new(false),
            })
        };
        let factory: Arc<dyn ChannelFactory<TestChannel>> = Arc::new(factory);
        let demux = Arc::new(ApiChannelDemux::new(TARGET, factory, directory.clone()));
        Harness {
            demux,
            directory,
            created,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_target_identifier() {
        let h = harness();
        assert_eq!(h.demux.target_identifier(), TARGET);
    }

    #[test]
    fn test_resolve_caches_channel() {
        let h = harness();
        let first = h.demux.resolve_channel("10.0.0.1").unwrap();
        let second = h.demux.resolve_channel("10.0.0.1").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
        assert_eq!(first.host(), "10.0.0.1");
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let h = harness();
        let err = h.demux.resolve_channel("bad-host").unwrap_err();
        assert!(matches!(err, Error::ChannelCreation { ref host, .. } if host == "bad-host"));
        assert!(h.demux.cached_hosts().is_empty());
    }

    #[test]
    fn test_concurrent_resolve_creates_once() {
        let h = harness();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let demux = h.demux.clone();
                std::thread::spawn(move || demux.resolve_channel("10.0.0.7").unwrap())
            })
            .collect();
        let channels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(h.created.load(Ordering::SeqCst), 1);
        assert!(channels.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_evict_closes_and_recreates() {
        let h = harness();
        let first = h.demux.resolve_channel("10.0.0.1").unwrap();

        assert!(h.demux.evict("10.0.0.1"));
        assert!(first.is_closed());
        assert!(!h.demux.evict("10.0.0.1"));

        let second = h.demux.resolve_channel("10.0.0.1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
        assert_eq!(h.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_directory_removal_evicts_channel() {
        let h = harness();
        h.directory.register_host(TARGET, "h1").await.unwrap();
        h.directory.register_host(TARGET, "h2").await.unwrap();
        h.demux.start().await.unwrap();

        let h1 = h.demux.resolve_channel("h1").unwrap();
        let h2 = h.demux.resolve_channel("h2").unwrap();

        h.directory.deregister_host(TARGET, "h1").await.unwrap();
        let demux = h.demux.clone();
        wait_until(move || demux.cached_hosts() == vec!["h2".to_string()]).await;

        assert!(h1.is_closed());
        assert!(!h2.is_closed());

        let fresh = h.demux.resolve_channel("h1").unwrap();
        assert!(!Arc::ptr_eq(&h1, &fresh));
        assert_eq!(h.created.load(Ordering::SeqCst), 3);

        h.demux.shutdown();
    }

    #[tokio::test]
    async fn test_added_host_is_lazy() {
        let h = harness();
        h.demux.start().await.unwrap();

        h.directory.register_host(TARGET, "h1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.demux.cached_hosts().is_empty());
        assert_eq!(h.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_evicts_unregistered_hosts() {
        let h = harness();
        h.directory.register_host(TARGET, "h1").await.unwrap();
        let stale = h.demux.resolve_channel("gone").unwrap();
        h.demux.resolve_channel("h1").unwrap();

        h.demux.start().await.unwrap();

        assert!(stale.is_closed());
        assert_eq!(h.demux.cached_hosts(), vec!["h1"]);
        h.demux.shutdown();
    }

    #[tokio::test]
    async fn test_next_channel_round_robin() {
        let h = harness();
        let err = h.demux.next_channel().await.unwrap_err();
        assert!(matches!(err, Error::NoAvailableHosts(_)));

        h.directory.register_host(TARGET, "h1").await.unwrap();
        h.directory.register_host(TARGET, "h2").await.unwrap();

        let a = h.demux.next_channel().await.unwrap();
        let b = h.demux.next_channel().await.unwrap();
        let c = h.demux.next_channel().await.unwrap();

        assert_ne!(a.host(), b.host());
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(h.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let h = harness();
        h.demux.start().await.unwrap();
        let a = h.demux.resolve_channel("a").unwrap();
        let b = h.demux.resolve_channel("b").unwrap();

        h.demux.shutdown();

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(h.demux.cached_hosts().is_empty());
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let h = harness();
        h.directory.register_host(TARGET, "h1").await.unwrap();
        h.demux.resolve_channel("h1").unwrap();

        h.demux.shutdown();

        let err = h.demux.resolve_channel("h1").unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
        assert!(matches!(h.demux.next_channel().await, Err(Error::Channel(_))));
        assert!(matches!(h.demux.start().await, Err(Error::Channel(_))));
        assert!(h.demux.cached_hosts().is_empty());
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_evict_and_resolve_keep_one_open_channel() {
        let h = harness();
        let issued: Arc<Mutex<Vec<Arc<TestChannel>>>> = Arc::new(Mutex::new(Vec::new()));

        let resolvers: Vec<_> = (0..4)
            .map(|_| {
                let demux = h.demux.clone();
                let issued = issued.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let channel = demux.resolve_channel("h").unwrap();
                        issued.lock().unwrap().push(channel);
                    }
                })
            })
            .collect();
        let evictors: Vec<_> = (0..2)
            .map(|_| {
                let demux = h.demux.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        demux.evict("h");
                    }
                })
            })
            .collect();

        // Check the invariants while both sides are running
        for _ in 0..500 {
            // Hold the issued list so no resolver can record mid-check
            let issued = issued.lock().unwrap();
            let cached = h.demux.lock_cache().channels.get("h").cloned();
            if let Some(cached) = &cached {
                assert!(!cached.is_closed(), "cache holds a closed channel");
            }
            let mut open: Vec<&Arc<TestChannel>> = Vec::new();
            for channel in issued.iter().filter(|c| !c.is_closed()) {
                if !open.iter().any(|o| Arc::ptr_eq(o, channel)) {
                    open.push(channel);
                }
            }
            assert!(open.len() <= 1, "{} open channels for one host", open.len());
            drop(issued);
            std::thread::yield_now();
        }

        for handle in resolvers.into_iter().chain(evictors) {
            handle.join().unwrap();
        }

        let issued = issued.lock().unwrap();
        let open: Vec<_> = issued.iter().filter(|c| !c.is_closed()).collect();
        match h.demux.lock_cache().channels.get("h") {
            Some(cached) => assert!(open.iter().all(|c| Arc::ptr_eq(c, cached))),
            None => assert!(open.is_empty()),
        }
        assert!(h.created.load(Ordering::SeqCst) >= 1);
    }
}
