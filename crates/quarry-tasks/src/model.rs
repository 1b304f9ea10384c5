//! The durable task record and its state machine.
//!
//! A task is itself a registered entity (table `__quarry_tasks`), persisted
//! through the same `Repository`/`Adapter` machinery as any other table,
//! rather than a bespoke storage path.

use chrono::{DateTime, Utc};
use quarry_core::common::{PkKind, PkValue, Record};
use quarry_core::metadata::{EntityMeta, EntityMetaBuilder, Entity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Canceled,
    WaitingRetry,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::WaitingRetry => "waiting_retry",
        };
        f.write_str(s)
    }
}

impl TaskStatus {
    /// Terminal states a [`crate::tracker::Tracker::resolve`] call returns
    /// on. `Scheduled` is deliberately excluded: a rescheduled retry is not
    /// "done", even transiently.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    None,
    Full,
    Equal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: JitterMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: JitterMode::Full,
        }
    }
}

/// A single handler call record, used by composite tasks to cache the
/// result of an already-succeeded step so a retried task resumes at the
/// failed step instead of redoing completed work.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepResult {
    pub step: String,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub kind: String,
    pub status: TaskStatus,
    pub payload: Value,
    pub attempt: u32,
    pub retry_policy: RetryPolicy,
    /// Steps already completed by a composite task, in order, with cached
    /// output. Empty for atomic (single-handler) tasks.
    pub step_results: Vec<StepResult>,
    /// Set when the status is `WaitingRetry`/`Scheduled`: the time a worker
    /// should next attempt the task.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// The currently-held lease, if any. `None` means no worker owns the
    /// task right now.
    pub lease_owner: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl TaskRecord {
    pub const TABLE: &'static str = "__quarry_tasks";

    pub fn new(kind: impl Into<String>, payload: Value, retry_policy: RetryPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            status: TaskStatus::Pending,
            payload,
            attempt: 0,
            retry_policy,
            step_results: Vec::new(),
            scheduled_at: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn step_output(&self, step: &str) -> Option<&Value> {
        self.step_results.iter().find(|s| s.step == step).map(|s| &s.output)
    }
}

impl Entity for TaskRecord {
    fn table() -> &'static str {
        Self::TABLE
    }

    fn register() -> EntityMeta {
        EntityMetaBuilder::new(Self::TABLE, "id", PkKind::Uuid)
            .column("id", "id")
            .column("status", "status")
            .column("scheduled_at", "scheduled_at")
            .build()
    }

    fn prepare(&self) -> Record {
        let value = serde_json::to_value(self).expect("TaskRecord always serialises");
        match value {
            Value::Object(map) => map,
            _ => unreachable!("TaskRecord serialises to an object"),
        }
    }

    fn revert(record: Record) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    fn primary_key(&self) -> PkValue {
        PkValue::Uuid(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_is_not_terminal() {
        assert!(!TaskStatus::Scheduled.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn prepare_revert_round_trips() {
        let record = TaskRecord::new("send_email", serde_json::json!({"to": "a@example.com"}), RetryPolicy::default());
        let prepared = record.prepare();
        let reverted = TaskRecord::revert(prepared).unwrap();
        assert_eq!(reverted.id, record.id);
        assert_eq!(reverted.kind, "send_email");
    }
}
