//! A filesystem-backed advisory lock, for coordinating across processes
//! rather than just tasks within one (the in-process [`quarry_core::lock`]
//! types only serialise within a single adapter instance).
//!
//! A holder creates a marker file with `O_EXCL` semantics (`create_new`);
//! everyone else polls until it disappears. There is no lease/expiry here —
//! a crashed holder leaves a stale marker behind, which is why this variant
//! is documented as advisory, not a correctness mechanism on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quarry_core::error::{QuarryError, Result};
use tokio::time::sleep;

use crate::encoding::encode_segment;

pub struct FsMultiLock {
    root: PathBuf,
    poll_interval: Duration,
}

impl FsMultiLock {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_millis(25),
        }
    }

    fn marker_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", encode_segment(key)))
    }

    /// Acquire the lock for `key`, polling until the marker file can be
    /// created exclusively. The returned guard removes the marker on drop.
    pub async fn acquire(&self, key: &str) -> Result<FsLockGuard> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| QuarryError::Internal(e.into()))?;
        let path = self.marker_path(key);
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    return Ok(FsLockGuard { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    sleep(self.poll_interval).await;
                }
                Err(e) => return Err(QuarryError::Internal(e.into())),
            }
        }
    }
}

pub struct FsLockGuard {
    path: PathBuf,
}

impl Drop for FsLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Remove a marker file left behind by a crashed holder. Operators call this
/// explicitly rather than it happening automatically, since there's no safe
/// way to distinguish "still held" from "abandoned" without a lease.
pub fn force_release(root: &Path, key: &str) -> Result<()> {
    let path = root.join(format!("{}.lock", encode_segment(key)));
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QuarryError::Internal(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FsMultiLock::new(dir.path());
        let guard = lock.acquire("a").await.unwrap();

        let lock2 = FsMultiLock::new(dir.path());
        let handle = tokio::spawn(async move {
            let _g = lock2.acquire("a").await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }
}
