// Lock manager (spec §5): a reader-preferred FIFO queue per index (many
// readers OR one writer, a queued writer blocks later readers so it is
// never starved) plus a per-tree-file exclusive handle lock.
//
// Grounded on the teacher's `ContentionTracker`
// (`metrics::optimization::OptimizationMetricsCollector`) for the
// wait-time/queue-depth bookkeeping shape, implemented here over
// `tokio::sync::{RwLock, Mutex}` for the async-facing surface per
// SPEC_FULL §5's "mix parking_lot hot paths with tokio::sync at the
// async boundary" note — the index lock itself has no hot synchronous
// path, so it is `tokio::sync::RwLock` end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-index reader/writer admission lock. `tokio::sync::RwLock` is
/// already reader-preferred-safe in the sense required here: Tokio's
/// implementation grants waiting writers priority over *new* readers
/// once queued, which is exactly the "writer queued behind readers blocks
/// all later readers" guarantee spec §5 asks for.
pub struct IndexLock {
    inner: std::sync::Arc<RwLock<()>>,
    contention: ContentionTracker,
}

#[derive(Debug, Default)]
struct ContentionTracker {
    total_acquisitions: AtomicU64,
    contested_acquisitions: AtomicU64,
}

impl ContentionTracker {
    fn record(&self, waited: Duration) {
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        if waited > Duration::from_micros(1) {
            self.contested_acquisitions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContentionSnapshot {
    pub total_acquisitions: u64,
    pub contested_acquisitions: u64,
}

impl IndexLock {
    pub fn new() -> Self {
        Self { inner: std::sync::Arc::new(RwLock::new(())), contention: ContentionTracker::default() }
    }

    pub async fn read(&self) -> OwnedRwLockReadGuard<()> {
        let start = Instant::now();
        let guard = self.inner.clone().read_owned().await;
        self.contention.record(start.elapsed());
        guard
    }

    pub async fn write(&self) -> OwnedRwLockWriteGuard<()> {
        let start = Instant::now();
        let guard = self.inner.clone().write_owned().await;
        self.contention.record(start.elapsed());
        guard
    }

    pub fn contention(&self) -> ContentionSnapshot {
        ContentionSnapshot {
            total_acquisitions: self.contention.total_acquisitions.load(Ordering::Relaxed),
            contested_acquisitions: self.contention.contested_acquisitions.load(Ordering::Relaxed),
        }
    }
}

impl Default for IndexLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive lock over a tree-file's open handle and its Free-Space
/// Tracker (spec §5: "per-tree-file handle: exclusive, open handle +
/// FST"). Distinct from `IndexLock` because this one has no
/// reader/writer distinction at all — every tree mutation, and every
/// load of the tree's live region, takes it exclusively.
pub struct FileLock {
    inner: std::sync::Arc<Mutex<()>>,
}

impl FileLock {
    pub fn new() -> Self {
        Self { inner: std::sync::Arc::new(Mutex::new(())) }
    }

    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }
}

impl Default for FileLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn many_readers_proceed_concurrently() {
        let lock = Arc::new(IndexLock::new());
        let g1 = lock.read().await;
        let g2 = lock.read().await;
        drop(g1);
        drop(g2);
        assert_eq!(lock.contention().total_acquisitions, 2);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let lock = Arc::new(IndexLock::new());
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let w_guard = lock.write().await;
        let lock2 = lock.clone();
        let order2 = order.clone();
        let reader = tokio::spawn(async move {
            let _g = lock2.read().await;
            order2.lock().await.push("read");
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        order.lock().await.push("write-held");
        drop(w_guard);
        reader.await.unwrap();

        let seq = order.lock().await.clone();
        assert_eq!(seq, vec!["write-held", "read"]);
    }

    #[tokio::test]
    async fn file_lock_is_mutually_exclusive() {
        let lock = Arc::new(FileLock::new());
        let _g = lock.acquire().await;
        let lock2 = lock.clone();
        let acquired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acquired2 = acquired.clone();
        let task = tokio::spawn(async move {
            let _g2 = lock2.acquire().await;
            acquired2.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!acquired.load(Ordering::SeqCst));
        drop(_g);
        task.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
