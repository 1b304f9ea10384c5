//! Observing a task from outside the worker that's running it.
//!
//! `resolve()` takes a snapshot right now, terminal or not. `wait()` polls
//! until the task reaches a terminal state (`Succeeded`/`Failed`/
//! `Canceled` — not `Scheduled`, since a rescheduled retry has not
//! finished).

use std::time::Duration;

use quarry_core::common::PkValue;
use quarry_core::error::{QuarryError, Result};
use quarry_repo::Repository;
use uuid::Uuid;

use crate::events::{EventReceiver, TaskEvent};
use crate::model::{TaskRecord, TaskStatus};

pub struct Tracker {
    repo: Repository<TaskRecord>,
    task_id: Uuid,
}

impl Tracker {
    pub fn new(repo: Repository<TaskRecord>, task_id: Uuid) -> Self {
        Self { repo, task_id }
    }

    /// A snapshot of the task's current state, whatever it is.
    pub async fn resolve(&self) -> Result<TaskRecord> {
        self.repo
            .read(&PkValue::Uuid(self.task_id))
            .await?
            .ok_or_else(|| QuarryError::not_found(TaskRecord::TABLE, self.task_id.to_string()))
    }

    /// Poll until the task reaches a terminal state.
    pub async fn wait(&self, poll_interval: Duration) -> Result<TaskRecord> {
        loop {
            let task = self.resolve().await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn on_succeed(&self, poll_interval: Duration) -> Result<Option<TaskRecord>> {
        let task = self.wait(poll_interval).await?;
        Ok((task.status == TaskStatus::Succeeded).then_some(task))
    }

    pub async fn on_failure(&self, poll_interval: Duration) -> Result<Option<TaskRecord>> {
        let task = self.wait(poll_interval).await?;
        Ok((task.status == TaskStatus::Failed).then_some(task))
    }

    pub async fn on_cancel(&self, poll_interval: Duration) -> Result<Option<TaskRecord>> {
        let task = self.wait(poll_interval).await?;
        Ok((task.status == TaskStatus::Canceled).then_some(task))
    }

    /// Drain whatever log lines have already arrived on the task's event
    /// stream without blocking for more.
    pub fn logs(&self, receiver: &mut EventReceiver) -> Vec<String> {
        receiver
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Log { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetryPolicy;
    use crate::state::TaskStateMachine;
    use quarry_memory::MemoryAdapter;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_once_succeeded() {
        let adapter: Arc<dyn quarry_core::adapter::Adapter> = Arc::new(MemoryAdapter::new());
        let repo: Repository<TaskRecord> = Repository::new(adapter);
        let task = TaskRecord::new("noop", serde_json::json!({}), RetryPolicy::default());
        let task_id = task.id;
        repo.create(task, None).await.unwrap();

        let repo_clone = repo.clone();
        tokio::spawn(async move {
            let sm = TaskStateMachine::new(&repo_clone);
            sm.start(task_id).await.unwrap();
            sm.succeed(task_id).await.unwrap();
        });

        let tracker = Tracker::new(repo, task_id);
        let result = tracker.wait(Duration::from_millis(5)).await.unwrap();
        assert_eq!(result.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn scheduled_is_not_a_resolve_stopping_point_for_wait() {
        let adapter: Arc<dyn quarry_core::adapter::Adapter> = Arc::new(MemoryAdapter::new());
        let repo: Repository<TaskRecord> = Repository::new(adapter);
        let mut task = TaskRecord::new("noop", serde_json::json!({}), RetryPolicy::default());
        task.status = TaskStatus::Scheduled;
        assert!(!task.status.is_terminal());
        repo.create(task, None).await.unwrap();
    }
}
