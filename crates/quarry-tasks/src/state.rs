//! The task status state machine: a fixed table of legal transitions,
//! validated centrally rather than scattered across call sites, with thin
//! named wrappers (`start`, `succeed`, `fail`, ...) for the common cases.

use chrono::Utc;
use quarry_core::common::PkValue;
use quarry_core::error::{QuarryError, Result};
use quarry_core::metadata::Entity;
use quarry_repo::Repository;
use uuid::Uuid;

use crate::model::{TaskRecord, TaskStatus};

fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Scheduled)
            | (Pending, Running)
            | (Scheduled, Running)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Running, Canceled)
            | (Running, WaitingRetry)
            | (WaitingRetry, Scheduled)
            | (Failed, Scheduled)
            | (Pending, Canceled)
            | (Scheduled, Canceled)
    )
}

pub struct TaskStateMachine<'a> {
    repo: &'a Repository<TaskRecord>,
}

impl<'a> TaskStateMachine<'a> {
    pub fn new(repo: &'a Repository<TaskRecord>) -> Self {
        Self { repo }
    }

    async fn transition(&self, task_id: Uuid, to: TaskStatus, apply: impl FnOnce(&mut TaskRecord)) -> Result<TaskRecord> {
        let mut task = self
            .repo
            .read(&PkValue::Uuid(task_id))
            .await?
            .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;

        if !is_valid_transition(task.status, to) {
            return Err(QuarryError::Validation(format!(
                "illegal task transition {} -> {} for task {}",
                task.status, to, task_id
            )));
        }

        task.status = to;
        task.updated_at = Utc::now();
        apply(&mut task);
        let id = task.primary_key();
        self.repo.update(&id, task, None).await
    }

    pub async fn start(&self, task_id: Uuid) -> Result<TaskRecord> {
        self.transition(task_id, TaskStatus::Running, |t| t.attempt += 1).await
    }

    pub async fn succeed(&self, task_id: Uuid) -> Result<TaskRecord> {
        self.transition(task_id, TaskStatus::Succeeded, |t| {
            t.lease_owner = None;
            t.lease_expires_at = None;
        })
        .await
    }

    pub async fn fail_permanently(&self, task_id: Uuid, error: String) -> Result<TaskRecord> {
        self.transition(task_id, TaskStatus::Failed, |t| {
            t.last_error = Some(error);
            t.lease_owner = None;
            t.lease_expires_at = None;
        })
        .await
    }

    pub async fn cancel(&self, task_id: Uuid, reason: String) -> Result<TaskRecord> {
        let current = self
            .repo
            .read(&PkValue::Uuid(task_id))
            .await?
            .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;
        self.transition(task_id, TaskStatus::Canceled, |t| {
            t.last_error = Some(reason);
            t.lease_owner = None;
            t.lease_expires_at = None;
        })
        .await
        .map_err(|e| {
            if current.status == TaskStatus::Canceled {
                QuarryError::Validation(format!("task {task_id} is already canceled"))
            } else {
                e
            }
        })
    }

    /// Move a running task to `WaitingRetry` with the next scheduled attempt
    /// time already computed, or permanently to `Failed` if the retry
    /// budget is exhausted.
    pub async fn retry_or_fail(&self, task_id: Uuid, error: String, next_attempt_at: chrono::DateTime<Utc>) -> Result<TaskRecord> {
        let task = self
            .repo
            .read(&PkValue::Uuid(task_id))
            .await?
            .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, task_id.to_string()))?;

        if task.attempt >= task.retry_policy.max_attempts {
            return self.fail_permanently(task_id, error).await;
        }

        self.transition(task_id, TaskStatus::WaitingRetry, |t| {
            t.last_error = Some(error);
            t.scheduled_at = Some(next_attempt_at);
            t.lease_owner = None;
            t.lease_expires_at = None;
        })
        .await
    }

    pub async fn ready_for_dispatch(&self, task_id: Uuid) -> Result<TaskRecord> {
        self.transition(task_id, TaskStatus::Scheduled, |t| {
            t.scheduled_at = None;
        })
        .await
    }
}
