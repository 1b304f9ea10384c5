//! The storage adapter contract.
//!
//! An object-safe `#[async_trait]` trait stored behind `Arc<dyn Adapter>`,
//! with a compile-time assertion that object-safety never regresses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Flags, OpContext, OperationKind, PkValue, Record};
use crate::error::{QuarryError, Result};
use crate::query::compiler::Plan;
use crate::sequence::SequenceOptions;

/// The result of executing a [`Plan`] against an adapter.
#[derive(Debug, Clone)]
pub enum RawResult {
    Rows(Vec<Record>),
    Count(i64),
    Aggregate(Value),
}

impl RawResult {
    pub fn into_rows(self) -> Result<Vec<Record>> {
        match self {
            RawResult::Rows(rows) => Ok(rows),
            other => Err(QuarryError::Query(format!("expected rows, got {other:?}"))),
        }
    }
}

/// A pluggable storage backend. One adapter instance serves one flavour
/// (e.g. `"ram"`, `"fs"`) across every entity registered to use it.
///
/// `prepare`/`revert` are adapter-level, not entity-level: they let an
/// adapter attach or strip storage-specific bookkeeping (the filesystem
/// adapter, for instance, never needs any) independently of the
/// `Entity::prepare`/`revert` conversions in `quarry-core::metadata`.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn flavour(&self) -> &str;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Build the operation flags for a call, stamping a fresh correlation
    /// id and carrying through whatever the caller already populated.
    fn flags(&self, operation: OperationKind, partial: Option<Flags>) -> Flags {
        match partial {
            Some(mut flags) => {
                flags.operation = operation;
                flags
            }
            None => Flags::new(operation, None),
        }
    }

    fn prepare(&self, _table: &str, record: Record) -> Record {
        record
    }

    fn revert(&self, _table: &str, record: Record) -> Record {
        record
    }

    async fn create(&self, table: &str, record: Record, ctx: &OpContext) -> Result<Record>;

    async fn read(&self, table: &str, id: &PkValue, ctx: &OpContext) -> Result<Option<Record>>;

    async fn update(&self, table: &str, id: &PkValue, patch: Record, ctx: &OpContext) -> Result<Record>;

    /// Remove and return the record. Callers that need to restore what was
    /// there (bulk-operation rollback, the delete observer payload) use the
    /// returned value instead of re-reading the row before deleting it.
    async fn delete(&self, table: &str, id: &PkValue, ctx: &OpContext) -> Result<Record>;

    async fn raw(&self, plan: &Plan, ctx: &OpContext) -> Result<RawResult>;

    /// Atomically advance a sequence's stored value by `options.increment_by`
    /// and return the new current value. `quarry-repo`'s durable sequence
    /// allocator wraps this with the sequence's own entity bookkeeping.
    async fn next_sequence_value(&self, options: &SequenceOptions) -> Result<i64>;

    /// Normalise a raw backend error (e.g. an `io::Error` or a lock-poison
    /// panic payload wrapped in `anyhow`) into the canonical taxonomy. The
    /// default just boxes it as [`QuarryError::Internal`]; adapters that can
    /// distinguish "not found" or "conflict" from the raw error should
    /// override this.
    fn parse_error(&self, _table: &str, error: anyhow::Error) -> QuarryError {
        QuarryError::Internal(error)
    }
}

const _: () = {
    fn _assert_object_safe(_: &dyn Adapter) {}
};

/// Flavour-keyed registry of live adapters.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn Adapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        self.adapters
            .write()
            .expect("adapter registry poisoned")
            .insert(adapter.flavour().to_string(), adapter);
    }

    pub fn get(&self, flavour: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .expect("adapter registry poisoned")
            .get(flavour)
            .cloned()
    }

    pub fn require(&self, flavour: &str) -> Result<Arc<dyn Adapter>> {
        self.get(flavour)
            .ok_or_else(|| QuarryError::Unsupported(format!("no adapter registered for flavour '{flavour}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdapter;

    #[async_trait]
    impl Adapter for NoopAdapter {
        fn flavour(&self) -> &str {
            "noop"
        }

        async fn create(&self, _table: &str, record: Record, _ctx: &OpContext) -> Result<Record> {
            Ok(record)
        }

        async fn read(&self, _table: &str, _id: &PkValue, _ctx: &OpContext) -> Result<Option<Record>> {
            Ok(None)
        }

        async fn update(&self, _table: &str, _id: &PkValue, patch: Record, _ctx: &OpContext) -> Result<Record> {
            Ok(patch)
        }

        async fn delete(&self, _table: &str, _id: &PkValue, _ctx: &OpContext) -> Result<Record> {
            Ok(Record::new())
        }

        async fn raw(&self, _plan: &Plan, _ctx: &OpContext) -> Result<RawResult> {
            Ok(RawResult::Rows(Vec::new()))
        }

        async fn next_sequence_value(&self, _options: &SequenceOptions) -> Result<i64> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn registry_round_trips_boxed_adapter() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NoopAdapter));
        let adapter = registry.require("noop").unwrap();
        assert_eq!(adapter.flavour(), "noop");
        assert!(registry.get("missing").is_none());
    }
}
