//! The worker pool / claim loop: a bounded `Semaphore` caps concurrency, an
//! `mpsc` channel reports completions back to the loop, and a
//! `CancellationToken` lets the loop drain in-flight work instead of
//! dropping it when asked to stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quarry_core::common::PkValue;
use quarry_core::error::Result;
use quarry_core::query::{Attr, Builder};
use quarry_repo::Repository;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff;
use crate::control::{HandlerError, TaskControl};
use crate::events::EventBus;
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::lease::LeaseManager;
use crate::model::{TaskRecord, TaskStatus};
use crate::state::TaskStateMachine;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval: Duration::from_millis(50),
            lease_duration: Duration::from_secs(30),
        }
    }
}

pub struct WorkerPool {
    repo: Repository<TaskRecord>,
    handlers: HandlerRegistry,
    leases: Arc<LeaseManager>,
    events: EventBus,
    config: WorkerPoolConfig,
    worker_id: Uuid,
}

enum LifecycleDone {
    Finished,
}

impl WorkerPool {
    pub fn new(repo: Repository<TaskRecord>, handlers: HandlerRegistry, events: EventBus, config: WorkerPoolConfig) -> Self {
        let leases = Arc::new(LeaseManager::new(repo.clone(), config.lease_duration));
        Self {
            repo,
            handlers,
            leases,
            events,
            config,
            worker_id: Uuid::new_v4(),
        }
    }

    /// Reset tasks left `Running` by a crashed worker (a lease that expired
    /// with nobody renewing it) back to retryable. Call once at startup.
    pub async fn reset_orphaned(&self) -> Result<usize> {
        let stmt = Builder::from(TaskRecord::TABLE)
            .filter(Attr::new("status").eq("running"))
            .build();
        let orphaned = self.repo.find_by_stmt(stmt).await?;
        let now = Utc::now();
        let mut reset = 0;
        for task in orphaned {
            let expired = task.lease_expires_at.map(|exp| exp < now).unwrap_or(true);
            if !expired {
                continue;
            }
            let sm = TaskStateMachine::new(&self.repo);
            if sm
                .retry_or_fail(task.id, "orphaned: worker lease expired without a heartbeat".to_string(), now)
                .await
                .is_ok()
            {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Run the claim loop until `cancel` fires, draining in-flight work
    /// before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.reset_orphaned().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let (tx, mut rx) = mpsc::channel::<LifecycleDone>(self.config.max_concurrency.max(1));
        let mut in_flight = 0usize;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let ready = self.claim_ready_tasks(semaphore.available_permits()).await?;
            for task in ready {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                in_flight += 1;
                let repo = self.repo.clone();
                let handlers = self.handlers.clone();
                let leases = self.leases.clone();
                let events = self.events.clone();
                let worker_id = self.worker_id;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_one(&repo, &handlers, &leases, &events, worker_id, task.id).await;
                    let _ = tx.send(LifecycleDone::Finished).await;
                });
            }

            tokio::select! {
                _ = rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }

        while in_flight > 0 {
            if rx.recv().await.is_some() {
                in_flight -= 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn claim_ready_tasks(&self, capacity: usize) -> Result<Vec<TaskRecord>> {
        if capacity == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let stmt = Builder::from(TaskRecord::TABLE)
            .filter(
                Attr::new("status")
                    .eq("pending")
                    .or(Attr::new("status").eq("scheduled"))
                    .or(Attr::new("status")
                        .eq("waiting_retry")
                        .and(Attr::new("scheduled_at").lte(now.to_rfc3339()))),
            )
            .limit(capacity)
            .build();
        let mut candidates = self.repo.find_by_stmt(stmt).await?;
        let sm = TaskStateMachine::new(&self.repo);
        let mut claimed = Vec::new();
        for task in candidates.drain(..) {
            let readied = match task.status {
                TaskStatus::Pending => sm.start(task.id).await,
                TaskStatus::Scheduled => sm.start(task.id).await,
                TaskStatus::WaitingRetry => match sm.ready_for_dispatch(task.id).await {
                    Ok(_) => sm.start(task.id).await,
                    Err(e) => Err(e),
                },
                _ => continue,
            };
            if let Ok(task) = readied {
                if self.leases.acquire(task.id, self.worker_id).await.ok().flatten().is_some() {
                    claimed.push(task);
                }
            }
        }
        Ok(claimed)
    }
}

async fn run_one(
    repo: &Repository<TaskRecord>,
    handlers: &HandlerRegistry,
    leases: &LeaseManager,
    events: &EventBus,
    worker_id: Uuid,
    task_id: Uuid,
) {
    let task = match repo.read(&PkValue::Uuid(task_id)).await {
        Ok(Some(task)) => task,
        _ => return,
    };

    let Some(handler) = handlers.get(&task.kind) else {
        tracing::warn!(kind = %task.kind, "no handler registered for task kind");
        let sm = TaskStateMachine::new(repo);
        let _ = sm
            .fail_permanently(task_id, format!("no handler registered for kind '{}'", task.kind))
            .await;
        return;
    };

    let mut ctx = HandlerContext::new(task.clone(), worker_id, leases, events);
    let outcome = handler.run(&mut ctx).await;
    let sm = TaskStateMachine::new(repo);

    match outcome {
        Ok(output) => {
            events
                .emit(crate::events::TaskEvent::Result {
                    task_id,
                    output,
                    at: Utc::now(),
                })
                .await;
            let _ = sm.succeed(task_id).await;
        }
        Err(HandlerError::Control(TaskControl::Cancel(reason))) => {
            let _ = sm.cancel(task_id, reason).await;
        }
        Err(HandlerError::Control(TaskControl::Fail(reason))) => {
            let _ = sm.fail_permanently(task_id, reason).await;
        }
        Err(HandlerError::Control(TaskControl::Retry)) => {
            let _ = sm.retry_or_fail(task_id, "handler requested retry".to_string(), Utc::now()).await;
        }
        Err(HandlerError::Control(TaskControl::Reschedule(at))) => {
            let _ = sm.retry_or_fail(task_id, "handler requested reschedule".to_string(), at).await;
        }
        Err(HandlerError::Other(e)) => {
            let delay = backoff::compute_delay(&task.retry_policy, task.attempt);
            let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            let _ = sm.retry_or_fail(task_id, e.to_string(), next_attempt_at).await;
        }
    }

    let _ = leases.release(task_id, worker_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::model::RetryPolicy;
    use async_trait::async_trait;
    use quarry_memory::MemoryAdapter;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn kind(&self) -> &str {
            "echo"
        }

        async fn run(&self, ctx: &mut HandlerContext<'_>) -> std::result::Result<Value, HandlerError> {
            Ok(ctx.task.payload.clone())
        }
    }

    struct AlwaysFailsHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for AlwaysFailsHandler {
        fn kind(&self) -> &str {
            "always_fails"
        }

        async fn run(&self, _ctx: &mut HandlerContext<'_>) -> std::result::Result<Value, HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Other(anyhow::anyhow!("boom")))
        }
    }

    fn pool_with(handlers: HandlerRegistry) -> (WorkerPool, Repository<TaskRecord>) {
        let adapter: Arc<dyn quarry_core::adapter::Adapter> = Arc::new(MemoryAdapter::new());
        let repo: Repository<TaskRecord> = Repository::new(adapter);
        let (events, _rx) = EventBus::new(16);
        let config = WorkerPoolConfig {
            max_concurrency: 2,
            poll_interval: Duration::from_millis(10),
            lease_duration: Duration::from_secs(30),
        };
        (WorkerPool::new(repo.clone(), handlers, events, config), repo)
    }

    #[tokio::test]
    async fn pending_task_is_claimed_and_succeeds() {
        let handlers = HandlerRegistry::new();
        handlers.register(Arc::new(EchoHandler));
        let (pool, repo) = pool_with(handlers);

        let task = TaskRecord::new("echo", json!({"hello": "world"}), RetryPolicy::default());
        let task_id = task.id;
        repo.create(task, None).await.unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        pool.run(cancel).await.unwrap();

        let finished = repo.read(&PkValue::Uuid(task_id)).await.unwrap().unwrap();
        assert_eq!(finished.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn failing_task_exhausts_retries_and_lands_on_failed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = HandlerRegistry::new();
        handlers.register(Arc::new(AlwaysFailsHandler(calls.clone())));
        let (pool, repo) = pool_with(handlers);

        let mut policy = RetryPolicy::default();
        policy.max_attempts = 2;
        policy.base_delay_ms = 1;
        policy.max_delay_ms = 2;
        let task = TaskRecord::new("always_fails", json!({}), policy);
        let task_id = task.id;
        repo.create(task, None).await.unwrap();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel_clone.cancel();
        });
        pool.run(cancel).await.unwrap();

        let finished = repo.read(&PkValue::Uuid(task_id)).await.unwrap().unwrap();
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
