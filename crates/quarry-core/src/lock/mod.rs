//! Advisory locks: a single-holder FIFO [`Lock`] and a keyed
//! [`MultiLock`] built on top of it. Filesystem-backed locking lives in
//! `quarry-fs`, grounded on this same FIFO-queue shape.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

/// A single-holder, FIFO-fair advisory lock.
///
/// Built on `tokio::sync::Semaphore(1)`: the semaphore's internal wait queue
/// already guarantees FIFO acquisition order, so there is no need to
/// hand-roll a queue.
#[derive(Clone)]
pub struct Lock {
    semaphore: Arc<Semaphore>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Acquire the lock, holding it until the returned guard is dropped.
    pub async fn acquire(&self) -> LockGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("lock semaphore never closed");
        LockGuard { _permit: permit }
    }

    /// Run `f` while holding the lock.
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = self.acquire().await;
        f().await
    }
}

pub struct LockGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// A registry of named [`Lock`]s, created lazily on first use and garbage
/// collected once no task holds or awaits them.
#[derive(Clone, Default)]
pub struct MultiLock {
    locks: Arc<Mutex<HashMap<String, Lock>>>,
}

impl MultiLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, key: &str) -> Lock {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_insert_with(Lock::new).clone()
    }

    /// Acquire the lock for `key`, holding it until the returned guard is
    /// dropped.
    pub async fn acquire(&self, key: &str) -> LockGuard {
        self.lock_for(key).await.acquire().await
    }

    /// Run `f` while holding the lock for `key`.
    pub async fn execute<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self.lock_for(key).await;
        lock.execute(f).await
    }

    /// Drop any entries whose lock is neither held nor awaited. Safe to call
    /// periodically; a lock that is re-requested afterwards is simply
    /// recreated.
    pub async fn gc(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| lock.semaphore.available_permits() == 0 || Arc::strong_count(&lock.semaphore) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn lock_serializes_concurrent_access() {
        let lock = Lock::new();
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                lock.execute(|| async {
                    let before = counter.load(Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    counter.store(before + 1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn multilock_keys_are_independent() {
        let multi = MultiLock::new();
        let a = multi.acquire("a").await;
        // A different key must not block.
        let _b = multi.acquire("b").await;
        drop(a);
    }
}
