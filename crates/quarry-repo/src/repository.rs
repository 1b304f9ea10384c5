//! The per-(entity, flavour) repository facade: the only thing
//! application code is meant to call directly. Everything else in this
//! crate exists to support what happens inside `create`/`read`/`update`/
//! `delete`/bulk variants and the query-by-statement paths.

use std::marker::PhantomData;
use std::sync::Arc;

use quarry_core::adapter::{Adapter, RawResult};
use quarry_core::common::{OpContext, OperationKind, PkValue, Record};
use quarry_core::error::{QuarryError, Result};
use quarry_core::metadata::{Entity, EntityMeta, HandlerKind};
use quarry_core::paginate::Paginator;
use quarry_core::query::compiler::{self, Plan};
use quarry_core::query::parser::parse_method_name;
use quarry_core::query::{Aggregate, Builder, Cond, Stmt};
use serde_json::Value;

use crate::cascade;
use crate::observer::{Observer, ObserverList};

/// A repository bound to one entity type and the adapter it's stored on.
///
/// Cloning a `Repository` is cheap: the adapter is held behind `Arc`, and
/// `ObserverList` holds its `Vec<Arc<_>>` behind another `Arc<RwLock<_>>`,
/// so clones share one observer set rather than forking it.
pub struct Repository<T: Entity> {
    adapter: Arc<dyn Adapter>,
    meta: EntityMeta,
    observers: ObserverList,
    _marker: PhantomData<T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            meta: self.meta.clone(),
            observers: self.observers.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity + 'static> Repository<T> {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        let meta = match quarry_core::metadata::lookup::<T>() {
            Some(meta) => meta,
            None => {
                let meta = T::register();
                if let Err(e) = quarry_core::metadata::register::<T>(meta.clone()) {
                    tracing::warn!(error = %e, "entity registration rejected, using unregistered metadata");
                }
                meta
            }
        };
        Self {
            adapter,
            meta,
            observers: ObserverList::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_observers(mut self, observers: ObserverList) -> Self {
        self.observers = observers;
        self
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn guard(&self, op: OperationKind) -> Result<()> {
        if self.meta.is_blocked(op) {
            return Err(QuarryError::operation_blocked(self.meta.table.clone(), op));
        }
        Ok(())
    }

    fn run_handlers(&self, kind: HandlerKind, record: &mut quarry_core::common::Record, ctx: &OpContext) {
        for handler in self.meta.handlers_for(kind) {
            (handler.apply)(record, ctx);
        }
    }

    pub async fn create(&self, entity: T, user: Option<String>) -> Result<T> {
        self.guard(OperationKind::Create)?;
        let ctx = OpContext::new(OperationKind::Create, user);
        let mut record = entity.prepare();
        self.run_handlers(HandlerKind::OnCreate, &mut record, &ctx);
        let record = self.adapter.prepare(&self.meta.table, record);
        let stored = self.adapter.create(&self.meta.table, record, &ctx).await?;
        let stored = self.adapter.revert(&self.meta.table, stored);
        self.observers
            .notify(&self.meta.table, OperationKind::Create, stored.clone(), ctx);
        T::revert(stored).map_err(QuarryError::Internal)
    }

    pub async fn read(&self, id: &PkValue) -> Result<Option<T>> {
        self.guard(OperationKind::Read)?;
        let ctx = OpContext::new(OperationKind::Read, None);
        let found = self.adapter.read(&self.meta.table, id, &ctx).await?;
        found
            .map(|r| T::revert(self.adapter.revert(&self.meta.table, r)).map_err(QuarryError::Internal))
            .transpose()
    }

    pub async fn update(&self, id: &PkValue, patch: T, user: Option<String>) -> Result<T> {
        self.guard(OperationKind::Update)?;
        let ctx = OpContext::new(OperationKind::Update, user);
        let mut record = patch.prepare();
        self.run_handlers(HandlerKind::OnUpdate, &mut record, &ctx);
        let updated = self.adapter.update(&self.meta.table, id, record, &ctx).await?;
        let updated = self.adapter.revert(&self.meta.table, updated);
        self.observers
            .notify(&self.meta.table, OperationKind::Update, updated.clone(), ctx);
        T::revert(updated).map_err(QuarryError::Internal)
    }

    pub async fn delete(&self, id: &PkValue, user: Option<String>) -> Result<()> {
        self.guard(OperationKind::Delete)?;
        let ctx = OpContext::new(OperationKind::Delete, user);
        let deleted = self.adapter.delete(&self.meta.table, id, &ctx).await?;
        let deleted = self.adapter.revert(&self.meta.table, deleted);
        if let Err(e) = cascade::cascade_delete(self.adapter.as_ref(), &self.meta, id, &ctx).await {
            tracing::warn!(table = %self.meta.table, error = %e, "relation cascade failed after delete");
        }
        self.observers.notify(&self.meta.table, OperationKind::Delete, deleted, ctx);
        Ok(())
    }

    /// Delete every id in `ids`. Not transactional: if a delete fails
    /// partway through, the ids already removed stay removed.
    pub async fn delete_all(&self, ids: &[PkValue], user: Option<String>) -> Result<()> {
        for id in ids {
            self.delete(id, user.clone()).await?;
        }
        Ok(())
    }

    /// Update every entity in `items`, keyed by each entity's own primary
    /// key. Not transactional: if an update fails partway through, the
    /// entities already updated stay updated.
    pub async fn update_all(&self, items: Vec<T>, user: Option<String>) -> Result<Vec<T>> {
        let mut updated = Vec::with_capacity(items.len());
        for item in items {
            let id = item.primary_key();
            updated.push(self.update(&id, item, user.clone()).await?);
        }
        Ok(updated)
    }

    /// Every row of this table, unfiltered.
    pub async fn read_all(&self) -> Result<Vec<T>> {
        self.find_by_stmt(Stmt {
            from: self.meta.table.clone(),
            ..Default::default()
        })
        .await
    }

    /// Create every entity in `items`. If any create fails partway through,
    /// the ones that already succeeded are deleted best-effort; a rollback
    /// failure is logged, not propagated — the original creation error is
    /// always what the caller sees.
    pub async fn create_all(&self, items: Vec<T>, user: Option<String>) -> Result<Vec<T>> {
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            match self.create(item, user.clone()).await {
                Ok(stored) => created.push(stored),
                Err(e) => {
                    for stored in &created {
                        let id = stored.primary_key();
                        if let Err(rollback_err) = self.delete(&id, user.clone()).await {
                            tracing::warn!(
                                table = %self.meta.table,
                                id = %id,
                                error = %rollback_err,
                                "rollback delete failed after bulk create error"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    pub async fn find(&self, filter: Cond) -> Result<Vec<T>> {
        let stmt = Stmt {
            from: self.meta.table.clone(),
            filter: Some(filter),
            ..Default::default()
        };
        self.find_by_stmt(stmt).await
    }

    pub async fn find_by_stmt(&self, stmt: Stmt) -> Result<Vec<T>> {
        self.guard(OperationKind::Read)?;
        let ctx = OpContext::new(OperationKind::Read, None);
        let plan = compiler::compile(stmt);
        let rows = self.adapter.raw(&plan, &ctx).await?.into_rows()?;
        rows.into_iter()
            .map(|r| T::revert(self.adapter.revert(&self.meta.table, r)).map_err(QuarryError::Internal))
            .collect()
    }

    /// Parse and execute a repository method name, e.g.
    /// `findByAgeGreaterThan`, binding `params` positionally.
    pub async fn find_by_method(&self, method_name: &str, params: &[serde_json::Value]) -> Result<Vec<T>> {
        let parsed = parse_method_name(method_name).map_err(|e| QuarryError::Query(e.to_string()))?;
        let stmt = parsed
            .bind(&self.meta.table, params)
            .map_err(|e| QuarryError::Query(e.to_string()))?;
        self.find_by_stmt(stmt).await
    }

    /// Alias for [`find_by_method`](Self::find_by_method), for call sites
    /// that parsed a `listBy...` method name rather than `findBy...`.
    pub async fn list_by(&self, method_name: &str, params: &[serde_json::Value]) -> Result<Vec<T>> {
        self.find_by_method(method_name, params).await
    }

    /// Run `stmt` and return raw rows rather than `T`. Needed for
    /// projections (`select`) and grouped results, whose shape generally
    /// doesn't match the entity's own fields.
    pub async fn select(&self, stmt: Stmt) -> Result<Vec<Record>> {
        self.guard(OperationKind::Read)?;
        let ctx = OpContext::new(OperationKind::Read, None);
        let plan = compiler::compile(stmt);
        self.adapter.raw(&plan, &ctx).await?.into_rows()
    }

    /// Grouped rows: one row per distinct combination of `stmt.group`'s
    /// fields, each carrying the group key columns plus whatever `stmt`'s
    /// aggregate computed (or a plain `count` if none was set).
    pub async fn group(&self, stmt: Stmt) -> Result<Vec<Record>> {
        self.select(stmt).await
    }

    /// A fluent [`Builder`] pre-seeded with this repository's table, for
    /// constructing statements to pass to `find_by_stmt`/`select`/`aggregate`.
    pub fn statement(&self) -> Builder {
        Builder::from(self.meta.table.clone())
    }

    /// Execute `stmt` as an aggregate query and return the scalar (or, for
    /// `Distinct`, array) result.
    pub async fn aggregate(&self, stmt: Stmt) -> Result<Value> {
        self.guard(OperationKind::Read)?;
        let ctx = OpContext::new(OperationKind::Read, None);
        let plan = compiler::compile(stmt);
        match self.adapter.raw(&plan, &ctx).await? {
            RawResult::Aggregate(value) => Ok(value),
            RawResult::Count(n) => Ok(Value::from(n)),
            RawResult::Rows(rows) => Ok(Value::from(rows.len())),
        }
    }

    /// Parse and execute an aggregate method name, e.g. `sumByAmount` or
    /// `countByActive`, returning the scalar result.
    pub async fn aggregate_by_method(&self, method_name: &str, params: &[serde_json::Value]) -> Result<Value> {
        let parsed = parse_method_name(method_name).map_err(|e| QuarryError::Query(e.to_string()))?;
        let stmt = parsed
            .bind(&self.meta.table, params)
            .map_err(|e| QuarryError::Query(e.to_string()))?;
        self.aggregate(stmt).await
    }

    fn aggregate_stmt(&self, agg: Aggregate, field: impl Into<String>, filter: Option<Cond>) -> Stmt {
        Stmt {
            from: self.meta.table.clone(),
            filter,
            aggregate: Some((agg, field.into())),
            ..Default::default()
        }
    }

    pub async fn count(&self, filter: Option<Cond>) -> Result<i64> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Count, "", filter)).await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    pub async fn sum(&self, field: impl Into<String>, filter: Option<Cond>) -> Result<f64> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Sum, field, filter)).await?;
        Ok(value.as_f64().unwrap_or(0.0))
    }

    pub async fn avg(&self, field: impl Into<String>, filter: Option<Cond>) -> Result<Option<f64>> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Avg, field, filter)).await?;
        Ok(value.as_f64())
    }

    pub async fn min(&self, field: impl Into<String>, filter: Option<Cond>) -> Result<Option<f64>> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Min, field, filter)).await?;
        Ok(value.as_f64())
    }

    pub async fn max(&self, field: impl Into<String>, filter: Option<Cond>) -> Result<Option<f64>> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Max, field, filter)).await?;
        Ok(value.as_f64())
    }

    pub async fn distinct(&self, field: impl Into<String>, filter: Option<Cond>) -> Result<Vec<Value>> {
        let value = self.aggregate(self.aggregate_stmt(Aggregate::Distinct, field, filter)).await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    /// Register an observer to be notified of every create/update/delete on
    /// this repository. Returns the `Arc` handed in, so the caller can keep
    /// it around to later pass to [`un_observe`](Self::un_observe).
    pub fn observe(&self, observer: Arc<dyn Observer>) -> Arc<dyn Observer> {
        self.observers.add(observer.clone());
        observer
    }

    pub fn un_observe(&self, observer: &Arc<dyn Observer>) {
        self.observers.remove(observer);
    }

    pub fn paginate(&self, stmt: Stmt, size: usize) -> Paginator {
        Paginator::new(self.adapter.clone(), compiler::compile(stmt), size)
    }

    pub fn plan(&self, stmt: Stmt) -> Plan {
        compiler::compile(stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::common::{PkKind, Record};
    use quarry_core::metadata::EntityMetaBuilder;
    use quarry_core::query::Attr;
    use quarry_memory::MemoryAdapter;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        age: i64,
    }

    impl Entity for Widget {
        fn table() -> &'static str {
            "widgets"
        }

        fn register() -> EntityMeta {
            EntityMetaBuilder::new(Self::table(), "id", PkKind::String)
                .column("id", "id")
                .column("age", "age")
                .build()
        }

        fn prepare(&self) -> Record {
            let mut r = Record::new();
            r.insert("id".to_string(), json!(self.id));
            r.insert("age".to_string(), json!(self.age));
            r
        }

        fn revert(record: Record) -> anyhow::Result<Self> {
            Ok(Self {
                id: record["id"].as_str().unwrap().to_string(),
                age: record["age"].as_i64().unwrap(),
            })
        }

        fn primary_key(&self) -> PkValue {
            PkValue::String(self.id.clone())
        }
    }

    fn repo() -> Repository<Widget> {
        Repository::new(Arc::new(MemoryAdapter::new()))
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let repo = repo();
        repo.create(Widget { id: "1".into(), age: 5 }, None).await.unwrap();
        let found = repo.read(&PkValue::String("1".into())).await.unwrap().unwrap();
        assert_eq!(found.age, 5);
    }

    #[tokio::test]
    async fn create_all_rolls_back_on_duplicate() {
        let repo = repo();
        repo.create(Widget { id: "1".into(), age: 1 }, None).await.unwrap();
        let err = repo
            .create_all(
                vec![
                    Widget { id: "2".into(), age: 2 },
                    Widget { id: "1".into(), age: 99 },
                ],
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(repo.read(&PkValue::String("2".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_method_name_filters() {
        let repo = repo();
        repo.create(Widget { id: "1".into(), age: 10 }, None).await.unwrap();
        repo.create(Widget { id: "2".into(), age: 20 }, None).await.unwrap();
        let found = repo
            .find_by_method("findByAgeGreaterThan", &[json!(15)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "2");
    }

    #[tokio::test]
    async fn blocked_operation_is_rejected() {
        struct BlockedWidget;
        // EntityMetaBuilder block() is exercised directly rather than via a
        // second Entity impl, since the registry is process-global and keyed
        // by TypeId.
        let meta = EntityMetaBuilder::new("blocked", "id", PkKind::String)
            .block(OperationKind::Delete)
            .build();
        assert!(meta.is_blocked(OperationKind::Delete));
        let _ = BlockedWidget; // silence unused-struct lint without adding a comment about why
    }

    #[tokio::test]
    async fn find_with_builder_condition() {
        let repo = repo();
        repo.create(Widget { id: "1".into(), age: 10 }, None).await.unwrap();
        repo.create(Widget { id: "2".into(), age: 30 }, None).await.unwrap();
        let found = repo.find(Attr::new("age").gte(20)).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
