//! Bounded cache of revocable image handles.
//!
//! Each evidence id maps to a [`HandlePair`] (stamped + base). Entries are kept
//! in least-recently-used order and the oldest entry is evicted once the cache
//! grows past its capacity. Evicting an entry revokes both of its handles.
//!
//! # Coalescing
//!
//! At most one operation works on an id at a time. The operation that claims
//! an id publishes its outcome on a per-id `watch` channel; every `load` that
//! arrives while the claim is held waits on that channel and returns the very
//! same outcome, so N concurrent loads cost one pair of store reads.
//!
//! A claim is released exactly once, by the operation that took it, whether it
//! succeeds, fails or is dropped mid-flight. A claim released without an
//! outcome makes waiting loads start over.
//!
//! # Locking
//!
//! All state lives behind one `std::sync::Mutex` that is only held for short
//! synchronous sections and never across an `.await`. The [`HandleObserver`]
//! is notified inside those sections, so it must not call back into the cache.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{ImageError, Result};
use crate::handle::{HandlePair, HandleTable, ImageHandle};
use crate::stamp::detect_mime;
use crate::store::{artifact_key, ArtifactKind, BlobStore};

/// Default number of resident entries.
pub const DEFAULT_CAPACITY: usize = 50;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Receives handle lifecycle events so that evidence records can mirror the
/// cache's view of their handles.
pub trait HandleObserver: Send + Sync {
    /// Fresh handles were created for `id`.
    fn handles_loaded(&self, id: &str, handles: &HandlePair);

    /// The handles of `id` were revoked.
    fn handles_released(&self, id: &str);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl HandleObserver for NoopObserver {
    fn handles_loaded(&self, _id: &str, _handles: &HandlePair) {}
    fn handles_released(&self, _id: &str) {}
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to stay within capacity
    pub evictions: u64,
}

/// Outcome slot shared with waiting loads. `None` until published.
type Outcome = Option<Result<HandlePair>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, HandlePair>,
    /// Front is least recently used
    order: VecDeque<String>,
    in_flight: HashMap<String, watch::Receiver<Outcome>>,
}

impl CacheState {
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|entry| entry == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id.to_string());
    }

    fn detach(&mut self, id: &str) -> Option<HandlePair> {
        let pair = self.entries.remove(id)?;
        if let Some(pos) = self.order.iter().position(|entry| entry == id) {
            self.order.remove(pos);
        }
        Some(pair)
    }

    fn in_flight_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.in_flight.keys().cloned().collect();
        ids.sort();
        ids
    }
}

enum Next {
    Wait(watch::Receiver<Outcome>),
    Work(Claim),
}

/// Exclusive right to operate on one id.
struct Claim {
    id: String,
    tx: watch::Sender<Outcome>,
    state: Arc<Mutex<CacheState>>,
    released: bool,
}

impl Claim {
    /// Release the claim and hand `outcome` to every waiter. Must be called
    /// with the state lock held.
    fn publish(mut self, state: &mut CacheState, outcome: Result<HandlePair>) {
        state.in_flight.remove(&self.id);
        self.tx.send_replace(Some(outcome));
        self.released = true;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.released {
            lock(&self.state).in_flight.remove(&self.id);
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits for a published outcome. `None` means the claim went away without one.
async fn wait_outcome(mut rx: watch::Receiver<Outcome>) -> Option<Result<HandlePair>> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    }
}

/// The evidence image cache.
pub struct ImageCache {
    store: Arc<dyn BlobStore>,
    observer: Arc<dyn HandleObserver>,
    handles: HandleTable,
    state: Arc<Mutex<CacheState>>,
    capacity: usize,
    timeout: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ImageCache {
    /// Create a cache over `store`. A capacity of zero is raised to one.
    pub fn new(
        store: Arc<dyn BlobStore>,
        observer: Arc<dyn HandleObserver>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            observer,
            handles: HandleTable::default(),
            state: Arc::new(Mutex::new(CacheState::default())),
            capacity: capacity.max(1),
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The underlying blob store
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident handles for `id`, without touching LRU order.
    pub fn peek(&self, id: &str) -> Option<HandlePair> {
        lock(&self.state).entries.get(id).cloned()
    }

    /// Ids in LRU order, least recently used first.
    pub fn lru_order(&self) -> Vec<String> {
        lock(&self.state).order.iter().cloned().collect()
    }

    /// Look up a live handle by its URL.
    pub fn resolve_url(&self, url: &str) -> Option<ImageHandle> {
        self.handles.resolve(url)
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Materialize the handle pair of `id`.
    ///
    /// Returns resident handles when both are still valid, joins an in-flight
    /// operation on the same id, or reads both artifacts from the store.
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self, id: &str) -> Result<HandlePair> {
        loop {
            let next = {
                let mut state = lock(&self.state);
                if let Some(rx) = state.in_flight.get(id) {
                    Next::Wait(rx.clone())
                } else if let Some(pair) = state.entries.get(id).cloned() {
                    if pair.is_valid() {
                        state.touch(id);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(id, "Cache hit");
                        return Ok(pair);
                    }
                    debug!(id, "Dropping entry with revoked handles");
                    self.release_locked(&mut state, id);
                    Next::Work(self.claim_locked(&mut state, id))
                } else {
                    Next::Work(self.claim_locked(&mut state, id))
                }
            };

            match next {
                Next::Wait(rx) => {
                    debug!(id, "Joining in-flight operation");
                    if let Some(outcome) = wait_outcome(rx).await {
                        return outcome;
                    }
                }
                Next::Work(claim) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(id, "Cache miss");
                    return self.fill(claim).await;
                }
            }
        }
    }

    async fn fill(&self, claim: Claim) -> Result<HandlePair> {
        let id = claim.id.clone();
        let read = self.read_artifacts(&id).await;

        let mut state = lock(&self.state);
        let outcome = match read {
            Ok((base, stamped)) => {
                let mime = detect_mime(&base).unwrap_or(FALLBACK_MIME);
                Ok(self.install_locked(&mut state, &id, base, stamped, mime))
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to load evidence image");
                Err(e)
            }
        };
        claim.publish(&mut state, outcome.clone());
        outcome
    }

    async fn read_artifacts(&self, id: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let base_key = artifact_key(id, ArtifactKind::Base);
        let stamped_key = artifact_key(id, ArtifactKind::Stamped);

        let (base, stamped) = self
            .bounded("read artifacts", async {
                tokio::join!(self.store.get(&base_key), self.store.get(&stamped_key))
            })
            .await?;

        match (base?, stamped?) {
            (Some(base), Some(stamped)) => {
                debug!(id, base = base.len(), stamped = stamped.len(), "Read artifacts");
                Ok((base, stamped))
            }
            _ => Err(ImageError::ArtifactMissing { id: id.to_string() }),
        }
    }

    /// Register freshly produced images without a store read.
    #[instrument(level = "debug", skip(self, base, stamped))]
    pub async fn insert(
        &self,
        id: &str,
        base: Vec<u8>,
        stamped: Vec<u8>,
        mime_type: &str,
    ) -> HandlePair {
        let claim = self.claim(id).await;
        let mut state = lock(&self.state);
        let pair = self.install_locked(&mut state, id, base, stamped, mime_type);
        claim.publish(&mut state, Ok(pair.clone()));
        pair
    }

    /// Persist a new base and stamped rendition, then swap in fresh handles.
    ///
    /// See [`Rewrite::commit`] for the write order and rollback.
    #[instrument(level = "debug", skip(self, new_base, new_stamped))]
    pub async fn invalidate_and_rewrite(
        &self,
        id: &str,
        new_base: Vec<u8>,
        new_stamped: Vec<u8>,
        mime_type: &str,
        preserve_original: bool,
    ) -> Result<HandlePair> {
        self.begin_rewrite(id)
            .await
            .commit(new_base, new_stamped, mime_type, preserve_original)
            .await
    }

    /// Claim `id` for a rewrite that has to read its current artifacts first.
    ///
    /// Loads and other writes of `id` wait until the returned [`Rewrite`] is
    /// committed or dropped.
    pub async fn begin_rewrite(&self, id: &str) -> Rewrite<'_> {
        Rewrite {
            cache: self,
            claim: self.claim(id).await,
        }
    }

    async fn restore_base(&self, id: &str, previous: Option<Vec<u8>>) {
        let key = artifact_key(id, ArtifactKind::Base);
        let restored = match previous {
            Some(bytes) => self.store.put(&key, bytes).await,
            None => self.store.delete(&key).await,
        };
        if let Err(e) = restored {
            warn!(id, error = %e, "Failed to restore previous base");
        }
    }

    async fn discard_original(&self, id: &str) {
        let key = artifact_key(id, ArtifactKind::Original);
        if let Err(e) = self.store.delete(&key).await {
            warn!(id, error = %e, "Failed to discard preserved original");
        }
    }

    /// Evict `id` and delete all of its artifacts. Removing an unknown id
    /// succeeds.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let claim = self.claim(id).await;
        {
            let mut state = lock(&self.state);
            self.release_locked(&mut state, id);
        }

        for kind in ArtifactKind::ALL {
            let key = artifact_key(id, kind);
            self.bounded("delete artifact", self.store.delete(&key))
                .await??;
        }

        let mut state = lock(&self.state);
        claim.publish(
            &mut state,
            Err(ImageError::ArtifactMissing { id: id.to_string() }),
        );
        debug!(id, "Evidence artifacts removed");
        Ok(())
    }

    /// Revoke every handle and empty the cache.
    ///
    /// Refuses with [`ImageError::Busy`] while any operation is in flight and
    /// leaves every entry in place.
    pub fn evict_all(&self) -> Result<usize> {
        let mut state = lock(&self.state);
        if !state.in_flight.is_empty() {
            let ids = state.in_flight_ids();
            warn!(?ids, "Refusing to evict while loads are in flight");
            return Err(ImageError::Busy { ids });
        }
        Ok(self.clear_locked(&mut state))
    }

    /// Wait for in-flight operations to finish, then evict everything.
    pub async fn drain_and_evict_all(&self) -> usize {
        loop {
            let waiting: Vec<watch::Receiver<Outcome>> = {
                let mut state = lock(&self.state);
                if state.in_flight.is_empty() {
                    return self.clear_locked(&mut state);
                }
                state.in_flight.values().cloned().collect()
            };
            debug!(count = waiting.len(), "Draining in-flight operations");
            for rx in waiting {
                let _ = wait_outcome(rx).await;
            }
        }
    }

    /// Take the claim on `id`, waiting out any operation that holds it.
    async fn claim(&self, id: &str) -> Claim {
        loop {
            let rx = {
                let mut state = lock(&self.state);
                match state.in_flight.get(id) {
                    Some(rx) => rx.clone(),
                    None => return self.claim_locked(&mut state, id),
                }
            };
            let _ = wait_outcome(rx).await;
        }
    }

    fn claim_locked(&self, state: &mut CacheState, id: &str) -> Claim {
        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(id.to_string(), rx);
        Claim {
            id: id.to_string(),
            tx,
            state: Arc::clone(&self.state),
            released: false,
        }
    }

    /// Replace whatever is resident for `id` with fresh handles, mark it most
    /// recently used and enforce capacity.
    fn install_locked(
        &self,
        state: &mut CacheState,
        id: &str,
        base: Vec<u8>,
        stamped: Vec<u8>,
        mime_type: &str,
    ) -> HandlePair {
        if let Some(old) = state.detach(id) {
            self.handles.revoke_pair(&old);
        }
        let pair = self.handles.create_pair(base, stamped, mime_type);
        state.entries.insert(id.to_string(), pair.clone());
        state.touch(id);
        self.observer.handles_loaded(id, &pair);
        self.enforce_capacity(state);
        pair
    }

    fn enforce_capacity(&self, state: &mut CacheState) {
        while state.entries.len() > self.capacity {
            let Some(victim) = state.order.front().cloned() else {
                return;
            };
            if state.in_flight.contains_key(&victim) {
                warn!(
                    id = %victim,
                    entries = state.entries.len(),
                    capacity = self.capacity,
                    "LRU victim is in flight, skipping eviction"
                );
                return;
            }
            debug!(id = %victim, "Evicting least recently used entry");
            self.release_locked(state, &victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn release_locked(&self, state: &mut CacheState, id: &str) {
        if let Some(pair) = state.detach(id) {
            self.handles.revoke_pair(&pair);
            self.observer.handles_released(id);
        }
    }

    fn clear_locked(&self, state: &mut CacheState) -> usize {
        let ids: Vec<String> = state.order.drain(..).collect();
        for id in &ids {
            if let Some(pair) = state.entries.remove(id) {
                self.handles.revoke_pair(&pair);
                self.observer.handles_released(id);
            }
        }
        state.entries.clear();
        info!(count = ids.len(), "Evicted all cache entries");
        ids.len()
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = T>) -> Result<T> {
        match self.timeout {
            None => Ok(fut.await),
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!(operation, millis = limit.as_millis() as u64, "Store operation timed out");
                ImageError::TimedOut {
                    operation: operation.to_string(),
                    millis: limit.as_millis() as u64,
                }
            }),
        }
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("stats", &self.stats())
            .field("live_handles", &self.handles.len())
            .finish()
    }
}

/// Exclusive access to one id while its artifacts are replaced.
///
/// Dropping a `Rewrite` without committing leaves the store and the resident
/// handles as they were, and makes waiting loads start over.
pub struct Rewrite<'a> {
    cache: &'a ImageCache,
    claim: Claim,
}

impl Rewrite<'_> {
    pub fn id(&self) -> &str {
        &self.claim.id
    }

    /// Read one artifact of the claimed id.
    pub async fn read(&self, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        let key = artifact_key(self.id(), kind);
        Ok(self
            .cache
            .bounded("read artifact", self.cache.store.get(&key))
            .await??)
    }

    /// Write the new base and stamped rendition, then swap in fresh handles.
    ///
    /// With `preserve_original`, the current base is copied to the `original`
    /// artifact first unless one already exists. If any write fails, the
    /// previous base is put back, an `original` written by this call is
    /// deleted again and the resident handles stay untouched.
    pub async fn commit(
        self,
        new_base: Vec<u8>,
        new_stamped: Vec<u8>,
        mime_type: &str,
        preserve_original: bool,
    ) -> Result<HandlePair> {
        let Rewrite { cache, claim } = self;
        let id = claim.id.clone();
        let base_key = artifact_key(&id, ArtifactKind::Base);
        let stamped_key = artifact_key(&id, ArtifactKind::Stamped);
        let original_key = artifact_key(&id, ArtifactKind::Original);

        let previous = cache.bounded("read base", cache.store.get(&base_key)).await??;

        let mut preserved = false;
        if preserve_original
            && !cache
                .bounded("check original", cache.store.contains(&original_key))
                .await??
        {
            let bytes = previous
                .clone()
                .ok_or_else(|| ImageError::ArtifactMissing { id: id.clone() })?;
            cache
                .bounded("write original", cache.store.put(&original_key, bytes))
                .await??;
            preserved = true;
            debug!(id = %id, "Original preserved");
        }

        let written = async {
            cache
                .bounded("write base", cache.store.put(&base_key, new_base.clone()))
                .await??;
            cache
                .bounded("write stamped", cache.store.put(&stamped_key, new_stamped.clone()))
                .await??;
            Ok::<(), ImageError>(())
        }
        .await;
        if let Err(e) = written {
            warn!(id = %id, error = %e, "Rewrite failed, restoring previous base");
            cache.restore_base(&id, previous).await;
            if preserved {
                cache.discard_original(&id).await;
            }
            return Err(e);
        }

        let mut state = lock(&cache.state);
        let pair = cache.install_locked(&mut state, &id, new_base, new_stamped, mime_type);
        claim.publish(&mut state, Ok(pair.clone()));
        info!(id = %id, "Evidence image rewritten");
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBlobStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Memory store that counts reads, can delay them and can fail writes.
    #[derive(Default)]
    struct TestStore {
        inner: MemoryBlobStore,
        reads: AtomicUsize,
        delay: Option<Duration>,
        fail_stamped_puts: AtomicBool,
    }

    impl TestStore {
        fn delayed(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStore for TestStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
            if key.ends_with("_stamped") && self.fail_stamped_puts.load(Ordering::SeqCst) {
                return Err(StoreError::Io("disk full".into()));
            }
            self.inner.put(key, bytes).await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.delete(key).await
        }

        async fn clear(&self) -> StoreResult<()> {
            self.inner.clear().await
        }
    }

    /// Observer that mirrors the current handles of each id.
    #[derive(Default)]
    struct Mirror {
        handles: Mutex<HashMap<String, HandlePair>>,
    }

    impl Mirror {
        fn get(&self, id: &str) -> Option<HandlePair> {
            self.handles.lock().unwrap().get(id).cloned()
        }
    }

    impl HandleObserver for Mirror {
        fn handles_loaded(&self, id: &str, handles: &HandlePair) {
            self.handles
                .lock()
                .unwrap()
                .insert(id.to_string(), handles.clone());
        }

        fn handles_released(&self, id: &str) {
            self.handles.lock().unwrap().remove(id);
        }
    }

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    async fn seed(store: &dyn BlobStore, id: &str) {
        let mut base = PNG_MAGIC.to_vec();
        base.extend_from_slice(id.as_bytes());
        store
            .put(&artifact_key(id, ArtifactKind::Base), base.clone())
            .await
            .unwrap();
        base.extend_from_slice(b"-stamped");
        store
            .put(&artifact_key(id, ArtifactKind::Stamped), base)
            .await
            .unwrap();
    }

    fn cache_with(store: Arc<TestStore>, capacity: usize) -> (Arc<ImageCache>, Arc<Mirror>) {
        let mirror = Arc::new(Mirror::default());
        let cache = ImageCache::new(store, mirror.clone(), capacity, None);
        (Arc::new(cache), mirror)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_coalesce() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(10)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.load("ev-1").await })
            })
            .collect();

        let mut pairs = Vec::new();
        for task in tasks {
            pairs.push(task.await.unwrap().unwrap());
        }

        assert_eq!(store.reads(), 2);
        assert!(pairs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_loads_share_one_slow_read() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(100)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(cache.load("ev-1"), cache.load("ev-1"));
        let elapsed = start.elapsed();

        assert_eq!(a.unwrap(), b.unwrap());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn test_hit_returns_same_handles_without_io() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let (cache, mirror) = cache_with(store.clone(), 10);

        let first = cache.load("ev-1").await.unwrap();
        let second = cache.load("ev-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.reads(), 2);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(first.base.mime_type(), "image/png");
        assert_eq!(mirror.get("ev-1"), Some(first));
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let store = Arc::new(TestStore::default());
        for i in 0..8 {
            seed(store.as_ref(), &format!("ev-{i}")).await;
        }
        let (cache, _) = cache_with(store, 3);

        let mut pairs = Vec::new();
        for i in 0..8 {
            pairs.push(cache.load(&format!("ev-{i}")).await.unwrap());
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 5);
        assert!(pairs[..5].iter().all(|p| !p.stamped.is_valid() && !p.base.is_valid()));
        assert!(pairs[5..].iter().all(HandlePair::is_valid));
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let store = Arc::new(TestStore::default());
        for id in ["A", "B", "C"] {
            seed(store.as_ref(), id).await;
        }
        let (cache, _) = cache_with(store, 2);

        let a = cache.load("A").await.unwrap();
        let b = cache.load("B").await.unwrap();
        cache.load("A").await.unwrap();
        cache.load("C").await.unwrap();

        assert!(a.is_valid());
        assert!(!b.is_valid());
        assert!(cache.peek("B").is_none());
        assert_eq!(cache.lru_order(), vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_one_revokes_previous_and_clears_record() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        seed(store.as_ref(), "ev-2").await;
        let (cache, mirror) = cache_with(store, 1);

        let first = cache.load("ev-1").await.unwrap();
        let first_url = first.stamped.url().to_string();
        cache.load("ev-2").await.unwrap();

        assert!(!first.stamped.is_valid());
        assert!(!first.base.is_valid());
        assert!(cache.resolve_url(&first_url).is_none());
        assert!(mirror.get("ev-1").is_none());
        assert!(mirror.get("ev-2").is_some());
    }

    #[tokio::test]
    async fn test_missing_artifacts() {
        let store = Arc::new(TestStore::default());
        store
            .put(&artifact_key("ev-1", ArtifactKind::Base), PNG_MAGIC.to_vec())
            .await
            .unwrap();
        let (cache, mirror) = cache_with(store, 10);

        let result = cache.load("ev-1").await;
        assert_eq!(result, Err(ImageError::ArtifactMissing { id: "ev-1".into() }));
        assert!(cache.is_empty());
        assert!(mirror.get("ev-1").is_none());
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_externally_revoked_handle_triggers_reload() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let first = cache.load("ev-1").await.unwrap();
        first.base.revoke();

        let second = cache.load("ev-1").await.unwrap();
        assert_ne!(first, second);
        assert!(second.is_valid());
        assert!(!first.stamped.is_valid());
        assert_eq!(store.reads(), 4);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let (cache, mirror) = cache_with(store.clone(), 10);

        let pair = cache.load("ev-1").await.unwrap();
        cache.remove("ev-1").await.unwrap();
        cache.remove("ev-1").await.unwrap();

        assert!(!pair.is_valid());
        assert!(mirror.get("ev-1").is_none());
        assert!(store.inner.is_empty());
        assert_eq!(
            cache.load("ev-1").await,
            Err(ImageError::ArtifactMissing { id: "ev-1".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_waits_for_in_flight_load() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(50)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let loading = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load("ev-1").await })
        };
        tokio::task::yield_now().await;

        cache.remove("ev-1").await.unwrap();
        let pair = loading.await.unwrap().unwrap();
        assert!(!pair.is_valid());
        assert!(cache.is_empty());
        assert!(store.inner.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_during_remove_sees_missing() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(50)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let removing = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.remove("ev-1").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(cache.stats().in_flight, 1);

        let result = cache.load("ev-1").await;
        assert_eq!(result, Err(ImageError::ArtifactMissing { id: "ev-1".into() }));
        removing.await.unwrap().unwrap();
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn test_insert_without_store_read() {
        let store = Arc::new(TestStore::default());
        let (cache, mirror) = cache_with(store.clone(), 10);

        let pair = cache
            .insert("ev-1", vec![1, 2], vec![3, 4], "image/jpeg")
            .await;
        assert_eq!(store.reads(), 0);
        assert_eq!(pair.stamped.bytes().as_deref(), Some(&[3u8, 4][..]));
        assert_eq!(pair.base.mime_type(), "image/jpeg");
        assert_eq!(mirror.get("ev-1"), Some(pair.clone()));
        assert_eq!(cache.load("ev-1").await.unwrap(), pair);
    }

    #[tokio::test]
    async fn test_rewrite_swaps_handles() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let (cache, mirror) = cache_with(store.clone(), 10);

        let old = cache.load("ev-1").await.unwrap();
        let new = cache
            .invalidate_and_rewrite(
                "ev-1",
                b"new-base".to_vec(),
                b"new-stamped".to_vec(),
                "image/png",
                false,
            )
            .await
            .unwrap();

        assert!(!old.is_valid());
        assert!(new.is_valid());
        assert_eq!(mirror.get("ev-1"), Some(new.clone()));
        assert_eq!(
            store.inner.get("ev-1_stamped").await.unwrap(),
            Some(b"new-stamped".to_vec())
        );
    }

    #[tokio::test]
    async fn test_failed_rewrite_restores_base() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let before = store.inner.get("ev-1_base").await.unwrap();
        let (cache, _) = cache_with(store.clone(), 10);

        let old = cache.load("ev-1").await.unwrap();
        store.fail_stamped_puts.store(true, Ordering::SeqCst);

        let result = cache
            .invalidate_and_rewrite(
                "ev-1",
                b"new-base".to_vec(),
                b"new-stamped".to_vec(),
                "image/png",
                true,
            )
            .await;

        assert!(matches!(result, Err(ImageError::Storage(_))));
        assert_eq!(store.inner.get("ev-1_base").await.unwrap(), before);
        assert_eq!(store.inner.get("ev-1_original").await.unwrap(), None);
        assert!(old.is_valid());
        assert_eq!(cache.load("ev-1").await.unwrap(), old);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_rewrite_preserves_original_once() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let first = store.inner.get("ev-1_base").await.unwrap();
        let (cache, _) = cache_with(store.clone(), 10);

        for (base, stamped) in [(b"edit-1", b"stmp-1"), (b"edit-2", b"stmp-2")] {
            cache
                .invalidate_and_rewrite("ev-1", base.to_vec(), stamped.to_vec(), "image/png", true)
                .await
                .unwrap();
        }

        assert_eq!(store.inner.get("ev-1_original").await.unwrap(), first);
        assert_eq!(
            store.inner.get("ev-1_base").await.unwrap(),
            Some(b"edit-2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rewrite_reads_under_claim() {
        let store = Arc::new(TestStore::default());
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store.clone(), 10);

        let rewrite = cache.begin_rewrite("ev-1").await;
        assert_eq!(cache.stats().in_flight, 1);
        assert!(matches!(cache.evict_all(), Err(ImageError::Busy { .. })));

        let base = rewrite.read(ArtifactKind::Base).await.unwrap().unwrap();
        let pair = rewrite
            .commit(base.clone(), b"restamped".to_vec(), "image/png", false)
            .await
            .unwrap();

        assert_eq!(pair.base.bytes().as_deref(), Some(base.as_slice()));
        assert_eq!(cache.stats().in_flight, 0);
        assert_eq!(store.inner.get("ev-1_original").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_flight_victim_is_not_evicted() {
        let store = Arc::new(TestStore::default());
        for id in ["A", "B", "C"] {
            seed(store.as_ref(), id).await;
        }
        let (cache, mirror) = cache_with(store, 1);

        let a = cache.load("A").await.unwrap();
        let rewrite = cache.begin_rewrite("A").await;

        let b = cache.load("B").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert!(mirror.get("A").is_some());

        // Once the claim is gone the cache shrinks back to its capacity
        drop(rewrite);
        let c = cache.load("C").await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 2);
        assert!(!a.is_valid());
        assert!(!b.is_valid());
        assert!(c.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_all_refuses_while_busy() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(100)));
        seed(store.as_ref(), "ev-1").await;
        seed(store.as_ref(), "ev-2").await;
        let (cache, _) = cache_with(store, 10);

        let resident = cache.load("ev-1").await.unwrap();
        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load("ev-2").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            cache.evict_all(),
            Err(ImageError::Busy {
                ids: vec!["ev-2".into()]
            })
        );
        assert!(resident.is_valid());

        pending.await.unwrap().unwrap();
        assert_eq!(cache.evict_all(), Ok(2));
        assert!(!resident.is_valid());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight() {
        let store = Arc::new(TestStore::delayed(Duration::from_millis(100)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, mirror) = cache_with(store, 10);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load("ev-1").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(cache.drain_and_evict_all().await, 1);
        let pair = pending.await.unwrap().unwrap();
        assert!(!pair.is_valid());
        assert!(mirror.get("ev-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_claim() {
        let store = Arc::new(TestStore::delayed(Duration::from_secs(5)));
        seed(store.as_ref(), "ev-1").await;
        let cache = ImageCache::new(
            store,
            Arc::new(NoopObserver),
            10,
            Some(Duration::from_secs(1)),
        );

        let result = cache.load("ev-1").await;
        assert!(matches!(result, Err(ImageError::TimedOut { millis: 1000, .. })));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_dropped_load_releases_claim() {
        let store = Arc::new(TestStore::delayed(Duration::from_secs(60)));
        seed(store.as_ref(), "ev-1").await;
        let (cache, _) = cache_with(store, 10);

        {
            let load = cache.load("ev-1");
            tokio::pin!(load);
            let _ = tokio::time::timeout(Duration::from_millis(1), &mut load).await;
            assert_eq!(cache.stats().in_flight, 1);
        }
        assert_eq!(cache.stats().in_flight, 0);
    }
}
