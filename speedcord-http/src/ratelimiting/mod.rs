//! The global lock, per-bucket lock table, and header parsing that back
//! [`Client::request`]'s ratelimit handling.
//!
//! [`Client::request`]: crate::client::Client::request

pub mod headers;

pub use self::headers::{HeaderParsingError, RatelimitExceeded, RatelimitHeaders};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

/// A boolean gate shared by every request through a [`Client`].
///
/// Acquiring (`wait`) is a no-op while the gate is open. The 429-global path
/// clears it, sleeps `retry_after`, then re-sets it, so every other request
/// in flight queues behind the same wait.
///
/// [`Client`]: crate::client::Client
#[derive(Debug, Default)]
pub struct GlobalLock {
    open: AtomicBool,
    // Purely used to give concurrent waiters a single point of
    // contention to queue on instead of spin-polling the atomic.
    gate: Mutex<()>,
}

impl GlobalLock {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            gate: Mutex::new(()),
        }
    }

    /// Blocks until the global lock is open. A no-op when it already is.
    pub async fn wait(&self) {
        if self.open.load(Ordering::Acquire) {
            return;
        }

        // Queue behind whoever is holding the gate closed; once acquired
        // the lock is necessarily open again (the holder re-sets it before
        // releasing the gate), so we can return immediately.
        let _ = self.gate.lock().await;
    }

    /// Closes the gate for `retry_after`, then re-opens it. Must only be
    /// called by a caller that already holds the bucket lock for the
    /// request that triggered the global 429.
    pub async fn clear_for(&self, retry_after: Duration) {
        let _guard = self.gate.lock().await;
        self.open.store(false, Ordering::Release);
        tracing::warn!(?retry_after, "global ratelimit hit, pausing all requests");
        sleep(retry_after).await;
        self.open.store(true, Ordering::Release);
    }
}

/// Per-bucket mutual exclusion with a deferred-release escape hatch.
///
/// A normal acquirer releases on guard drop. When a response reports
/// `remaining == 0`, the holder instead calls [`BucketGuard::defer`], which
/// suppresses the drop-release and spawns a timer task that releases the
/// lock after `reset_after` -- see the dropped-vs-held lock decision
/// recorded in DESIGN.md.
#[derive(Debug)]
pub struct BucketLock {
    lock: Arc<Mutex<()>>,
}

impl BucketLock {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn acquire(&self) -> BucketGuard {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        BucketGuard {
            guard: Some(guard),
            lock: Arc::clone(&self.lock),
        }
    }
}

/// RAII guard returned by [`BucketLock::acquire`].
pub struct BucketGuard {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
}

impl BucketGuard {
    /// Marks this bucket as exhausted: the guard is handed off to a timer
    /// task that releases it after `reset_after`, instead of releasing on
    /// drop. The bucket remains held (unavailable to the next waiter) the
    /// entire time.
    pub fn defer(mut self, reset_after: Duration) {
        if let Some(guard) = self.guard.take() {
            tracing::debug!(?reset_after, "bucket exhausted, deferring release");
            tokio::spawn(async move {
                sleep(reset_after).await;
                drop(guard);
            });
        }
    }

    /// Drops the bucket's inner mutex, runs `during`, then re-acquires it.
    ///
    /// Used on the 429-global path to release the bucket across the
    /// global-lock-clear sleep (so an unrelated bucket isn't head-of-line
    /// blocked by it) and reclaim it before retrying.
    pub async fn release_during<F: std::future::Future<Output = T>, T>(mut self, during: F) -> (Self, T) {
        self.guard.take();
        let output = during.await;
        let lock = Arc::clone(&self.lock);
        let guard = lock.lock_owned().await;
        (
            Self {
                guard: Some(guard),
                lock,
            },
            output,
        )
    }
}

/// Table mapping a bucket key to its [`BucketLock`].
///
/// Lookups are guarded by a `RwLock` so concurrent requests to distinct,
/// already-known buckets don't serialize on table access; inserting a new
/// bucket briefly takes the write lock.
#[derive(Debug, Default)]
pub struct BucketTable {
    buckets: RwLock<HashMap<String, Arc<BucketLock>>>,
}

impl BucketTable {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `bucket`, creating it if this is the first time
    /// the key has been seen (a fresh bucket is installed before its first
    /// acquirer proceeds, so two concurrent first-time callers for the same
    /// new bucket don't race each other).
    pub async fn acquire(&self, bucket: &str) -> BucketGuard {
        loop {
            let lock = self.buckets.read().await.get(bucket).cloned();
            if let Some(lock) = lock {
                return lock.acquire().await;
            }

            let mut buckets = self.buckets.write().await;
            buckets.entry(bucket.to_owned()).or_insert_with(|| Arc::new(BucketLock::new()));
            drop(buckets);
            // restart the iteration so we acquire from the table-owned Arc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn second_acquirer_waits_for_first_to_release() {
        let table = BucketTable::new();
        let guard = table.acquire("bucket").await;

        let table = StdArc::new(table);
        let waiter = tokio::spawn({
            let table = StdArc::clone(&table);
            async move {
                table.acquire("bucket").await;
            }
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_release_holds_bucket_until_reset_after() {
        let table = StdArc::new(BucketTable::new());
        let guard = table.acquire("bucket").await;
        guard.defer(StdDuration::from_secs(1));

        let waiter = tokio::spawn({
            let table = StdArc::clone(&table);
            async move {
                table.acquire("bucket").await;
            }
        });

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        tokio::time::advance(StdDuration::from_secs(1)).await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn global_lock_blocks_preflight_while_cleared() {
        let lock = StdArc::new(GlobalLock::new());
        lock.wait().await; // no-op, open by default

        let lock2 = StdArc::clone(&lock);
        let closer = tokio::spawn(async move {
            lock2.clear_for(StdDuration::from_millis(50)).await;
        });

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let waiter_lock = StdArc::clone(&lock);
        let waiter = tokio::spawn(async move {
            waiter_lock.wait().await;
        });

        closer.await.unwrap();
        waiter.await.unwrap();
        assert!(lock.open.load(Ordering::Acquire));
    }
}
