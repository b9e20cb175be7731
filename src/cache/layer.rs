//! Cache Layer - one tier of the cache hierarchy
//!
//! A layer wraps a [`BlobStore`] and keeps an advisory [`RecencyIndex`] of
//! what it believes the store holds, together with atomic byte/item totals
//! that eviction strategies read.
//!
//! # Design
//!
//! - Store calls are awaited by the caller; index maintenance is not.
//!   Bookkeeping ops are queued in call order and applied by detached tasks
//!   under the index write lock, so the index converges to the store's state
//!   once those tasks drain (see [`Layer::quiesce`]).
//! - The index is advisory. Blobs the index does not know about (e.g. left on
//!   disk by a previous process) are adopted on their next successful `get`.
//! - Eviction sweeps are serialized per layer and evaluate every strategy
//!   against live state, in configured order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::policy::{EvictionStrategy, LayerUsage};
use super::recency::{RecencyIndex, Touch};
use crate::error::Result;
use crate::store::BlobStore;

/// Snapshot of a layer's tracked totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerStats {
    /// Tracked item count
    pub items: u64,
    /// Tracked byte total
    pub bytes: u64,
}

/// Deferred index maintenance
#[derive(Debug)]
enum Bookkeeping {
    /// Successful get/put; `sweep` requests an eviction pass afterwards
    Access { key: String, size: u64, sweep: bool },
    /// Successful delete
    Forget { key: String },
}

struct Shared {
    name: String,
    store: Arc<dyn BlobStore>,
    strategies: Vec<Box<dyn EvictionStrategy>>,
    index: RwLock<RecencyIndex>,
    pending: Mutex<VecDeque<Bookkeeping>>,
    bytes: AtomicU64,
    items: AtomicU64,
    evictions: AtomicU64,
    sweep: tokio::sync::Mutex<()>,
    tasks: TaskTracker,
    /// Held across close/wait/reopen of `tasks`
    quiescing: tokio::sync::Mutex<()>,
}

/// One cache tier: a backing store, a recency index and eviction strategies.
///
/// Cloning is cheap and yields a handle to the same layer. Methods that
/// record accesses spawn onto the current Tokio runtime.
#[derive(Clone)]
pub struct Layer {
    shared: Arc<Shared>,
}

impl Layer {
    /// Create a layer over `store`. Without strategies nothing is ever evicted.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn BlobStore>,
        strategies: Vec<Box<dyn EvictionStrategy>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                store,
                strategies,
                index: RwLock::new(RecencyIndex::new()),
                pending: Mutex::new(VecDeque::new()),
                bytes: AtomicU64::new(0),
                items: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                sweep: tokio::sync::Mutex::new(()),
                tasks: TaskTracker::new(),
                quiescing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Layer name used in logs and metrics
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Underlying backing store
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.shared.store
    }

    /// Write `content` to the store. Counts as an access once the write
    /// succeeds; store errors are returned and leave the index untouched.
    pub async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let size = content.len() as u64;
        self.shared.store.put(key, content).await?;
        self.shared.submit(Bookkeeping::Access {
            key: key.to_string(),
            size,
            sweep: true,
        });
        Ok(())
    }

    /// Read `key` from the store. Counts as an access on success; untracked
    /// blobs are adopted into the index.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let content = self.shared.store.get(key).await?;
        self.shared.submit(Bookkeeping::Access {
            key: key.to_string(),
            size: content.len() as u64,
            sweep: false,
        });
        Ok(content)
    }

    /// Probe the store. Not an access: the index is never consulted or changed.
    pub async fn exists(&self, key: &str) -> bool {
        self.shared.store.exists(key).await
    }

    /// Delete `key` from the store, then stop tracking it
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.shared.store.delete(key).await?;
        self.shared.submit(Bookkeeping::Forget {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Run every strategy once, in order, evicting from the tail while each
    /// one holds. Returns the number of blobs removed from the store.
    pub async fn evict(&self) -> usize {
        self.shared.evict().await
    }

    /// Sweep every `period` until `cancel` fires. A sweep in progress always
    /// runs to completion; cancellation is only observed between ticks.
    pub async fn run_eviction(&self, period: Duration, cancel: CancellationToken) {
        info!(layer = %self.name(), ?period, "Starting background eviction");

        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(layer = %self.name(), "Background eviction shutting down");
                    break;
                }
                _ = tick.tick() => {
                    let evicted = self.evict().await;
                    if evicted > 0 {
                        debug!(layer = %self.name(), evicted, "Background sweep finished");
                    }
                }
            }
        }
    }

    /// Spawn [`Layer::run_eviction`] as a dedicated task
    pub fn spawn_eviction(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let layer = self.clone();
        tokio::spawn(async move { layer.run_eviction(period, cancel).await })
    }

    /// Wait until every bookkeeping task spawned so far has finished.
    /// Concurrent callers take turns.
    pub async fn quiesce(&self) {
        let _turn = self.shared.quiescing.lock().await;
        let tasks = &self.shared.tasks;
        tasks.close();
        tasks.wait().await;
        tasks.reopen();
    }

    /// Tracked totals
    pub fn stats(&self) -> LayerStats {
        LayerStats {
            items: self.shared.items.load(Ordering::Relaxed),
            bytes: self.shared.bytes.load(Ordering::Relaxed),
        }
    }

    /// Blobs removed by every sweep so far, whatever triggered it
    pub fn evictions(&self) -> u64 {
        self.shared.evictions.load(Ordering::Relaxed)
    }

    /// Current usage as seen by eviction strategies
    pub fn usage(&self) -> LayerUsage {
        self.shared.usage()
    }

    /// Tracked keys, most recently used first
    pub fn tracked_keys(&self) -> Vec<String> {
        self.shared.index.read().keys()
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.shared.name)
            .field("strategies", &self.shared.strategies)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn submit(self: &Arc<Self>, op: Bookkeeping) {
        self.pending.lock().push_back(op);

        let shared = Arc::clone(self);
        self.tasks.spawn(async move {
            if shared.apply_pending() {
                shared.evict().await;
            }
        });
    }

    /// Drain queued ops in submission order. Returns true if a sweep was
    /// requested by any of them.
    fn apply_pending(&self) -> bool {
        // Draining under the index lock keeps ops from two tasks in order
        let mut index = self.index.write();
        let ops: Vec<Bookkeeping> = self.pending.lock().drain(..).collect();

        let mut sweep = false;
        for op in ops {
            match op {
                Bookkeeping::Access {
                    key,
                    size,
                    sweep: requested,
                } => {
                    self.record_access(&mut index, &key, size);
                    sweep |= requested;
                }
                Bookkeeping::Forget { key } => {
                    if let Some(entry) = index.remove(&key) {
                        self.items.fetch_sub(1, Ordering::Relaxed);
                        self.bytes.fetch_sub(entry.size, Ordering::Relaxed);
                    }
                }
            }
        }
        sweep
    }

    fn record_access(&self, index: &mut RecencyIndex, key: &str, size: u64) {
        match index.touch(key, size, Instant::now()) {
            Touch::Inserted => {
                self.items.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(size, Ordering::Relaxed);
            }
            Touch::Updated { previous_size } if size >= previous_size => {
                self.bytes
                    .fetch_add(size - previous_size, Ordering::Relaxed);
            }
            Touch::Updated { previous_size } => {
                self.bytes
                    .fetch_sub(previous_size - size, Ordering::Relaxed);
            }
        }
    }

    fn usage(&self) -> LayerUsage {
        let index = self.index.read();
        LayerUsage {
            tail_idle: index.peek_tail().map(|entry| entry.idle()),
            bytes: self.bytes.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
        }
    }

    async fn evict(&self) -> usize {
        if self.strategies.is_empty() {
            return 0;
        }
        let _sweep = self.sweep.lock().await;

        let mut evicted = 0;
        for strategy in &self.strategies {
            while strategy.should_evict(&self.usage()) {
                let entry = {
                    let mut index = self.index.write();
                    match index.pop_tail() {
                        Some(entry) => {
                            self.items.fetch_sub(1, Ordering::Relaxed);
                            self.bytes.fetch_sub(entry.size, Ordering::Relaxed);
                            entry
                        }
                        None => break,
                    }
                };

                // The entry is untracked either way; a blob that survives a
                // failed delete is adopted again on its next get.
                match self.store.delete(&entry.key).await {
                    Ok(()) => {
                        evicted += 1;
                        debug!(
                            layer = %self.name,
                            strategy = strategy.name(),
                            key = %entry.key,
                            size = entry.size,
                            "Evicted entry"
                        );
                    }
                    Err(e) => {
                        warn!(layer = %self.name, key = %entry.key, "Eviction delete failed: {}", e);
                    }
                }
            }
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::policy::{LastAccess, MaxCacheSize, MaxItems};
    use crate::error::Error;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// Memory store whose writes and deletes can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_put: AtomicBool,
        fail_delete: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        async fn put(&self, key: &str, content: Bytes) -> Result<()> {
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.inner.put(key, content).await
        }

        async fn get(&self, key: &str) -> Result<Bytes> {
            self.inner.get(key).await
        }

        async fn exists(&self, key: &str) -> bool {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.inner.delete(key).await
        }
    }

    fn memory_layer(strategies: Vec<Box<dyn EvictionStrategy>>) -> (Layer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let layer = Layer::new("test", store.clone(), strategies);
        (layer, store)
    }

    fn blob(len: usize) -> Bytes {
        Bytes::from(vec![b'x'; len])
    }

    #[tokio::test]
    async fn test_put_get_tracks_totals() {
        let (layer, _) = memory_layer(vec![]);

        layer.put("a", blob(10)).await.unwrap();
        layer.put("b", blob(20)).await.unwrap();
        assert_eq!(layer.get("a").await.unwrap(), blob(10));
        layer.quiesce().await;

        assert_eq!(layer.stats(), LayerStats { items: 2, bytes: 30 });
        assert_eq!(layer.tracked_keys(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_overwrite_applies_size_delta() {
        let (layer, _) = memory_layer(vec![]);

        layer.put("a", blob(50)).await.unwrap();
        layer.put("a", blob(20)).await.unwrap();
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats { items: 1, bytes: 20 });

        layer.put("a", blob(70)).await.unwrap();
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats { items: 1, bytes: 70 });
    }

    #[tokio::test]
    async fn test_get_adopts_untracked_blob() {
        let (layer, store) = memory_layer(vec![]);
        store.put("restored", blob(33)).await.unwrap();

        assert_eq!(layer.stats(), LayerStats::default());
        layer.get("restored").await.unwrap();
        layer.quiesce().await;

        assert_eq!(layer.stats(), LayerStats { items: 1, bytes: 33 });
    }

    #[tokio::test]
    async fn test_exists_is_not_an_access() {
        let (layer, store) = memory_layer(vec![]);
        store.put("k", blob(5)).await.unwrap();

        assert!(layer.exists("k").await);
        assert!(!layer.exists("other").await);
        layer.quiesce().await;

        assert_eq!(layer.stats(), LayerStats::default());
        assert!(layer.tracked_keys().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_propagates_not_found() {
        let (layer, _) = memory_layer(vec![]);

        let err = layer.get("missing").await.unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats::default());
    }

    #[tokio::test]
    async fn test_failed_put_leaves_index_untouched() {
        let store = Arc::new(FlakyStore::default());
        store.fail_put.store(true, Ordering::SeqCst);
        let layer = Layer::new("flaky", store.clone(), vec![]);

        let err = layer.put("k", blob(8)).await.unwrap_err();
        assert_matches!(err, Error::Io(_));
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats::default());
    }

    #[tokio::test]
    async fn test_delete_untracks() {
        let (layer, store) = memory_layer(vec![]);

        layer.put("a", blob(10)).await.unwrap();
        layer.put("b", blob(10)).await.unwrap();
        layer.delete("a").await.unwrap();
        layer.quiesce().await;

        assert_eq!(layer.stats(), LayerStats { items: 1, bytes: 10 });
        assert!(!store.exists("a").await);

        // Deleting an untracked key is harmless
        layer.delete("never").await.unwrap();
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats { items: 1, bytes: 10 });
    }

    #[tokio::test]
    async fn test_put_then_delete_without_waiting() {
        let (layer, _) = memory_layer(vec![]);

        for _ in 0..10 {
            layer.put("k", blob(3)).await.unwrap();
            layer.delete("k").await.unwrap();
        }
        layer.quiesce().await;
        assert_eq!(layer.stats(), LayerStats::default());
    }

    #[tokio::test]
    async fn test_max_cache_size_scenario() {
        let (layer, store) = memory_layer(vec![Box::new(MaxCacheSize::new(100))]);

        layer.put("a", blob(60)).await.unwrap();
        layer.quiesce().await;
        layer.put("b", blob(60)).await.unwrap();
        layer.quiesce().await;

        assert!(!store.exists("a").await);
        assert!(store.exists("b").await);
        assert!(layer.stats().bytes <= 100);
        assert_eq!(layer.tracked_keys(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_max_items_evicts_least_recently_used() {
        let (layer, store) = memory_layer(vec![Box::new(MaxItems::new(2))]);

        layer.put("a", blob(1)).await.unwrap();
        layer.put("b", blob(1)).await.unwrap();
        layer.put("c", blob(1)).await.unwrap();
        layer.quiesce().await;

        assert!(!store.exists("a").await);
        assert_eq!(layer.stats().items, 2);

        // Touch "b" so "c" becomes the eviction candidate
        layer.get("b").await.unwrap();
        layer.quiesce().await;
        layer.put("d", blob(1)).await.unwrap();
        layer.quiesce().await;

        assert!(store.exists("b").await);
        assert!(!store.exists("c").await);
        assert!(store.exists("d").await);
        assert_eq!(layer.tracked_keys(), vec!["d", "b"]);
    }

    #[tokio::test]
    async fn test_last_access_evicts_idle_entries() {
        let (layer, store) =
            memory_layer(vec![Box::new(LastAccess::new(Duration::from_millis(40)))]);

        layer.put("old", blob(1)).await.unwrap();
        layer.quiesce().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The sweep after this put ages out "old" but keeps "fresh"
        layer.put("fresh", blob(1)).await.unwrap();
        layer.quiesce().await;
        assert!(!store.exists("old").await);
        assert!(store.exists("fresh").await);

        assert_eq!(layer.evict().await, 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(layer.evict().await, 1);
        assert_eq!(layer.stats(), LayerStats::default());
    }

    #[tokio::test]
    async fn test_empty_layer_never_evicts() {
        let (layer, _) = memory_layer(vec![
            Box::new(LastAccess::new(Duration::ZERO)),
            Box::new(MaxCacheSize::new(0)),
            Box::new(MaxItems::new(0)),
        ]);
        assert_eq!(layer.evict().await, 0);
    }

    #[tokio::test]
    async fn test_strategies_are_cumulative() {
        let (layer, store) = memory_layer(vec![
            Box::new(MaxItems::new(3)),
            Box::new(MaxCacheSize::new(25)),
        ]);
        // No sweeping while populating: write straight to the store, then adopt
        for (key, len) in [("a", 10), ("b", 10), ("c", 10), ("d", 10), ("e", 10)] {
            store.put(key, blob(len)).await.unwrap();
            layer.get(key).await.unwrap();
        }
        layer.quiesce().await;
        assert_eq!(layer.stats().items, 5);

        // MaxItems drops a, b; MaxCacheSize then sees 30 bytes and drops c
        assert_eq!(layer.evict().await, 3);
        assert_eq!(layer.tracked_keys(), vec!["e", "d"]);
        assert_eq!(layer.stats(), LayerStats { items: 2, bytes: 20 });
    }

    #[tokio::test]
    async fn test_failed_eviction_delete_untracks_and_readopts() {
        let store = Arc::new(FlakyStore::default());
        let layer = Layer::new("flaky", store.clone(), vec![Box::new(MaxItems::new(0))]);

        store.fail_delete.store(true, Ordering::SeqCst);
        layer.put("k", blob(4)).await.unwrap();
        layer.quiesce().await;

        // Untracked, but still on the store
        assert_eq!(layer.stats(), LayerStats::default());
        assert!(store.exists("k").await);

        store.fail_delete.store(false, Ordering::SeqCst);
        layer.get("k").await.unwrap();
        layer.quiesce().await;
        assert_eq!(layer.evict().await, 1);
        assert!(!store.exists("k").await);
        // Only the delete that went through counts
        assert_eq!(layer.evictions(), 1);
    }

    #[tokio::test]
    async fn test_background_eviction_until_cancelled() {
        let (layer, store) =
            memory_layer(vec![Box::new(LastAccess::new(Duration::from_millis(10)))]);
        store.put("k", blob(1)).await.unwrap();
        layer.get("k").await.unwrap();
        layer.quiesce().await;

        let cancel = CancellationToken::new();
        let handle = layer.spawn_eviction(Duration::from_millis(5), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.exists("k").await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!store.exists("k").await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("eviction loop did not stop")
            .unwrap();
        assert_eq!(layer.evictions(), 1);
    }

    #[tokio::test]
    async fn test_put_triggered_sweeps_are_counted() {
        let (layer, _) = memory_layer(vec![Box::new(MaxItems::new(2))]);

        for key in ["a", "b", "c", "d", "e"] {
            layer.put(key, blob(1)).await.unwrap();
            layer.quiesce().await;
        }

        assert_eq!(layer.evictions(), 3);
        assert_eq!(layer.evict().await, 0);
        assert_eq!(layer.evictions(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_quiesce_callers_all_return() {
        let (layer, _) = memory_layer(vec![Box::new(MaxItems::new(10))]);

        for round in 0..20 {
            for i in 0..10 {
                layer.put(&format!("k{}", i), blob(round + 1)).await.unwrap();
            }

            let waiters: Vec<_> = (0..8)
                .map(|_| {
                    let layer = layer.clone();
                    tokio::spawn(async move { layer.quiesce().await })
                })
                .collect();
            for waiter in waiters {
                tokio::time::timeout(Duration::from_secs(5), waiter)
                    .await
                    .expect("quiesce never returned")
                    .unwrap();
            }
        }

        assert_eq!(layer.stats(), LayerStats { items: 10, bytes: 200 });
    }
}
