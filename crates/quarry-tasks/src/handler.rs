//! Task handlers: an object-safe `#[async_trait]` trait stored behind
//! `Arc<dyn Handler>` in a kind-keyed [`HandlerRegistry`], with a
//! compile-time object-safety assertion so that property never silently
//! regresses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use quarry_core::common::PkValue;
use quarry_core::metadata::Entity;
use serde_json::Value;
use uuid::Uuid;

use crate::control::{HandlerError, TaskControl};
use crate::events::{EventBus, LogLevel, TaskEvent};
use crate::lease::LeaseManager;
use crate::model::{StepResult, TaskRecord};
use quarry_repo::Repository;

/// Everything a running handler needs: the task snapshot it was dispatched
/// with, a way to renew its lease, report progress/log lines, and cache
/// step results for composite tasks.
pub struct HandlerContext<'a> {
    pub task: TaskRecord,
    worker: Uuid,
    leases: &'a LeaseManager,
    events: &'a EventBus,
    pending_steps: Vec<StepResult>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(task: TaskRecord, worker: Uuid, leases: &'a LeaseManager, events: &'a EventBus) -> Self {
        Self {
            task,
            worker,
            leases,
            events,
            pending_steps: Vec::new(),
        }
    }

    /// Persist whatever step results have accumulated since the last flush,
    /// so a crash between composite steps resumes at the right place
    /// instead of redoing completed work.
    pub async fn flush(&mut self, repo: &Repository<TaskRecord>) -> quarry_core::error::Result<()> {
        if self.pending_steps.is_empty() {
            return Ok(());
        }
        self.task.step_results.append(&mut self.pending_steps);
        let id = self.task.primary_key();
        self.task = repo.update(&id, self.task.clone(), None).await?;
        Ok(())
    }

    pub fn cancel(&self, reason: impl Into<String>) -> HandlerError {
        TaskControl::Cancel(reason.into()).into()
    }

    pub fn retry(&self) -> HandlerError {
        TaskControl::Retry.into()
    }

    pub fn reschedule(&self, at: chrono::DateTime<Utc>) -> HandlerError {
        TaskControl::Reschedule(at).into()
    }

    pub fn fail(&self, reason: impl Into<String>) -> HandlerError {
        TaskControl::Fail(reason.into()).into()
    }

    /// Renew this worker's lease on the task. Returns the stale-lease error
    /// if another worker has already reclaimed ownership, so a long-running
    /// handler can abort promptly instead of doing wasted work.
    pub async fn heartbeat(&self) -> quarry_core::error::Result<()> {
        self.leases.heartbeat(self.task.id, self.worker).await?;
        Ok(())
    }

    pub async fn progress(&self, percent: Option<u8>, message: Option<String>) {
        self.events
            .emit(TaskEvent::Progress {
                task_id: self.task.id,
                percent,
                message,
                at: Utc::now(),
            })
            .await;
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.events
            .emit(TaskEvent::Log {
                task_id: self.task.id,
                level,
                message: message.into(),
                at: Utc::now(),
            })
            .await;
    }

    /// Look up a previously completed composite step's cached output.
    pub fn cached_step(&self, step: &str) -> Option<&Value> {
        self.task.step_output(step)
    }

    /// Record a step's output in-memory; persisted by the caller after the
    /// step returns (see `crate::composite`), so a crash between steps
    /// resumes at the right place instead of redoing completed work.
    pub fn cache_result(&mut self, step: impl Into<String>, output: Value) {
        self.pending_steps.push(StepResult {
            step: step.into(),
            output,
        });
    }

    pub fn take_pending_steps(&mut self) -> Vec<StepResult> {
        std::mem::take(&mut self.pending_steps)
    }

    pub fn primary_key(&self) -> PkValue {
        self.task.primary_key()
    }
}

/// One unit of work. Atomic tasks have exactly one handler; composite tasks
/// (see [`crate::composite`]) chain several together.
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> &str;
    async fn run(&self, ctx: &mut HandlerContext<'_>) -> Result<Value, HandlerError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Handler) {}
};

/// A single named step within a composite task.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &mut HandlerContext<'_>) -> Result<Value, HandlerError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Step) {}
};

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(handler.kind().to_string(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().expect("handler registry poisoned").get(kind).cloned()
    }
}
