//! Fire-and-forget change notification.
//!
//! Observers never block the operation they're observing and never fail it:
//! a panicking or erroring observer is logged via `tracing::warn!` and
//! otherwise ignored. Delivering an event is best-effort, not part of the
//! operation's own success or failure.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use quarry_core::common::{OpContext, OperationKind, Record};

#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_change(&self, table: &str, operation: OperationKind, record: &Record, ctx: &OpContext);
}

/// Shared, mutable behind `&self` so a `Repository` clone and the original
/// see the same observer set, and `observe`/`un_observe` don't need `&mut
/// self` on a type application code otherwise treats as cheaply `Clone`.
#[derive(Clone, Default)]
pub struct ObserverList {
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn Observer>) {
        self.observers.write().expect("observer list poisoned").push(observer);
    }

    /// Remove an observer previously added with [`add`](Self::add), matched
    /// by pointer identity rather than any `PartialEq` on the trait object.
    pub fn remove(&self, observer: &Arc<dyn Observer>) {
        self.observers
            .write()
            .expect("observer list poisoned")
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Notify every observer without waiting for any of them, and without
    /// letting an observer's failure affect the caller.
    pub fn notify(&self, table: &str, operation: OperationKind, record: Record, ctx: OpContext) {
        let observers = self.observers.read().expect("observer list poisoned").clone();
        for observer in observers {
            let table = table.to_string();
            let record = record.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                observer.on_change(&table, operation, &record, &ctx).await;
            });
        }
    }
}
