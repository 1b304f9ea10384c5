//! Multi-step composite tasks: a sequence of named [`Step`]s, each cached
//! as it succeeds so a task resumed after a crash (or a legal
//! `Failed -> Scheduled` retry) skips every step that already completed and
//! starts again at the one that didn't.

use async_trait::async_trait;
use quarry_repo::Repository;
use serde_json::Value;

use crate::control::HandlerError;
use crate::handler::{Handler, HandlerContext, Step};
use crate::model::TaskRecord;

pub struct CompositeHandler {
    kind: String,
    steps: Vec<std::sync::Arc<dyn Step>>,
    repo: Repository<TaskRecord>,
}

impl CompositeHandler {
    pub fn new(kind: impl Into<String>, steps: Vec<std::sync::Arc<dyn Step>>, repo: Repository<TaskRecord>) -> Self {
        Self {
            kind: kind.into(),
            steps,
            repo,
        }
    }
}

#[async_trait]
impl Handler for CompositeHandler {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn run(&self, ctx: &mut HandlerContext<'_>) -> Result<Value, HandlerError> {
        let mut last_output = Value::Null;
        for step in &self.steps {
            if let Some(cached) = ctx.cached_step(step.name()) {
                last_output = cached.clone();
                continue;
            }
            let output = step.run(ctx).await?;
            ctx.cache_result(step.name(), output.clone());
            ctx.flush(&self.repo)
                .await
                .map_err(|e| HandlerError::Other(e.into()))?;
            last_output = output;
        }
        Ok(last_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::lease::LeaseManager;
    use crate::model::RetryPolicy;
    use quarry_memory::MemoryAdapter;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct CountingStep {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Step for CountingStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &mut HandlerContext<'_>) -> Result<Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(HandlerError::Other(anyhow::anyhow!("boom")));
            }
            Ok(json!(self.name))
        }
    }

    #[tokio::test]
    async fn resumed_composite_skips_already_completed_steps() {
        let adapter: Arc<dyn quarry_core::adapter::Adapter> = Arc::new(MemoryAdapter::new());
        let repo: Repository<TaskRecord> = Repository::new(adapter);
        let task = TaskRecord::new("multi", json!({}), RetryPolicy::default());
        let task_id = task.id;
        repo.create(task.clone(), None).await.unwrap();

        let step_a_calls = Arc::new(AtomicUsize::new(0));
        let step_b_calls = Arc::new(AtomicUsize::new(0));
        let step_a = Arc::new(CountingStep {
            name: "a",
            calls: step_a_calls.clone(),
            fail_once: std::sync::atomic::AtomicBool::new(false),
        });
        let step_b = Arc::new(CountingStep {
            name: "b",
            calls: step_b_calls.clone(),
            fail_once: std::sync::atomic::AtomicBool::new(true),
        });

        let handler = CompositeHandler::new("multi", vec![step_a.clone(), step_b.clone()], repo.clone());
        let leases = LeaseManager::new(repo.clone(), std::time::Duration::from_secs(30));
        let (bus, _rx) = EventBus::new(8);
        let worker = Uuid::new_v4();

        {
            let mut ctx = HandlerContext::new(task.clone(), worker, &leases, &bus);
            let err = handler.run(&mut ctx).await.unwrap_err();
            assert!(matches!(err, HandlerError::Other(_)));
        }
        assert_eq!(step_a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(step_b_calls.load(Ordering::SeqCst), 1);

        let resumed_task = repo
            .read(&quarry_core::common::PkValue::Uuid(task_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed_task.step_results.len(), 1);

        {
            let mut ctx = HandlerContext::new(resumed_task, worker, &leases, &bus);
            let output = handler.run(&mut ctx).await.unwrap();
            assert_eq!(output, json!("b"));
        }
        // step "a" was not re-run on resume.
        assert_eq!(step_a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(step_b_calls.load(Ordering::SeqCst), 2);
    }
}
