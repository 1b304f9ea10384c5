//! Lease-based task ownership with heartbeat renewal.
//!
//! A worker holds a task by stamping `lease_owner`/`lease_expires_at`; a
//! stale lease (an owner whose `lease_expires_at` is in the past) can be
//! taken over by another worker. Heartbeats extend the lease; a heartbeat
//! that finds the lease no longer belongs to the calling worker means
//! another worker already reclaimed it, surfaced as
//! [`quarry_core::error::QuarryError::StaleLease`]: the scheduler's own
//! dispatch loop swallows the write and logs a warning, while a caller that
//! explicitly checks ownership gets the typed error.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use quarry_core::common::PkValue;
use quarry_core::error::{QuarryError, Result};
use quarry_core::lock::MultiLock;
use quarry_core::metadata::Entity;
use quarry_repo::Repository;
use uuid::Uuid;

use crate::model::TaskRecord;

pub struct LeaseManager {
    repo: Repository<TaskRecord>,
    locks: MultiLock,
    lease_duration: ChronoDuration,
}

impl LeaseManager {
    pub fn new(repo: Repository<TaskRecord>, lease_duration: std::time::Duration) -> Self {
        Self {
            repo,
            locks: MultiLock::new(),
            lease_duration: ChronoDuration::from_std(lease_duration).unwrap_or(ChronoDuration::seconds(30)),
        }
    }

    /// Attempt to claim `task_id` for `worker`. Fails with `NotFound` if the
    /// task doesn't exist, and silently refuses (`Ok(None)`) if another
    /// worker already holds a live lease.
    pub async fn acquire(&self, task_id: Uuid, worker: Uuid) -> Result<Option<TaskRecord>> {
        self.locks
            .execute(&task_id.to_string(), || async {
                let mut task = self
                    .repo
                    .read(&PkValue::Uuid(task_id))
                    .await?
                    .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;

                let now = Utc::now();
                let lease_is_live = task
                    .lease_expires_at
                    .map(|expires| expires > now)
                    .unwrap_or(false);
                if lease_is_live && task.lease_owner != Some(worker) {
                    return Ok(None);
                }

                task.lease_owner = Some(worker);
                task.lease_expires_at = Some(now + self.lease_duration);
                let id = task.primary_key();
                let saved = self.repo.update(&id, task, None).await?;
                Ok(Some(saved))
            })
            .await
    }

    /// Extend an already-held lease. Returns `StaleLease` if `worker` no
    /// longer owns it.
    pub async fn heartbeat(&self, task_id: Uuid, worker: Uuid) -> Result<TaskRecord> {
        self.locks
            .execute(&task_id.to_string(), || async {
                let mut task = self
                    .repo
                    .read(&PkValue::Uuid(task_id))
                    .await?
                    .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;

                if task.lease_owner != Some(worker) {
                    return Err(QuarryError::StaleLease { task_id });
                }
                task.lease_expires_at = Some(Utc::now() + self.lease_duration);
                let id = task.primary_key();
                self.repo.update(&id, task, None).await
            })
            .await
    }

    /// Release the lease, typically after a task reaches a terminal state
    /// or is handed back for retry.
    pub async fn release(&self, task_id: Uuid, worker: Uuid) -> Result<()> {
        self.locks
            .execute(&task_id.to_string(), || async {
                let mut task = self
                    .repo
                    .read(&PkValue::Uuid(task_id))
                    .await?
                    .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;
                if task.lease_owner != Some(worker) {
                    tracing::warn!(%task_id, "release called by non-owner, ignoring");
                    return Ok(());
                }
                task.lease_owner = None;
                task.lease_expires_at = None;
                let id = task.primary_key();
                self.repo.update(&id, task, None).await?;
                Ok(())
            })
            .await
    }

    pub fn repository(&self) -> &Repository<TaskRecord> {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetryPolicy;
    use quarry_memory::MemoryAdapter;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    fn manager() -> (LeaseManager, Repository<TaskRecord>) {
        let adapter: Arc<dyn quarry_core::adapter::Adapter> = StdArc::new(MemoryAdapter::new());
        let repo = Repository::new(adapter);
        (LeaseManager::new(repo.clone(), Duration::from_secs(30)), repo)
    }

    #[tokio::test]
    async fn second_worker_cannot_acquire_a_live_lease() {
        let (manager, repo) = manager();
        let task = TaskRecord::new("noop", serde_json::json!({}), RetryPolicy::default());
        repo.create(task.clone(), None).await.unwrap();

        let worker_a = Uuid::new_v4();
        let worker_b = Uuid::new_v4();
        assert!(manager.acquire(task.id, worker_a).await.unwrap().is_some());
        assert!(manager.acquire(task.id, worker_b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_by_non_owner_is_stale() {
        let (manager, repo) = manager();
        let task = TaskRecord::new("noop", serde_json::json!({}), RetryPolicy::default());
        repo.create(task.clone(), None).await.unwrap();

        let worker_a = Uuid::new_v4();
        let worker_b = Uuid::new_v4();
        manager.acquire(task.id, worker_a).await.unwrap();
        let err = manager.heartbeat(task.id, worker_b).await.unwrap_err();
        assert!(matches!(err, QuarryError::StaleLease { .. }));
    }
}
