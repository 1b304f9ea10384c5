//! Entity model & metadata.
//!
//! Carries declarative metadata from user code to the runtime via an
//! explicit builder invoked once per entity type, rather than relying on
//! reflection or a derive macro.

pub mod relation;

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::common::{OpContext, OperationKind, Record};
use relation::RelationMeta;

/// An index descriptor used by adapters that maintain derived index
/// structures (the filesystem adapter does; the in-memory adapter computes
/// indexes implicitly via linear scan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub fields: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// The declared type of the primary key.
pub use crate::common::PkKind;

/// When a field handler runs relative to the CRUD lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    OnCreate,
    OnUpdate,
}

/// A function attached to a field that mutates the in-flight record before
/// it reaches the adapter. Built-in handlers (timestamps, version, author)
/// are registered with priority `i32::MIN` so user handlers always observe
/// their effects; everything else composes in ascending `(priority,
/// group_priority)` order.
#[derive(Clone)]
pub struct FieldHandler {
    pub field: String,
    pub kind: HandlerKind,
    pub priority: i32,
    pub group_priority: i32,
    pub apply: Arc<dyn Fn(&mut Record, &OpContext) + Send + Sync>,
}

impl std::fmt::Debug for FieldHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldHandler")
            .field("field", &self.field)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("group_priority", &self.group_priority)
            .finish()
    }
}

/// Complete reflective metadata for one registered entity type.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub table: String,
    pub primary_key_field: String,
    pub primary_key_kind: PkKind,
    /// Ordered field-name -> column-name map, in declaration order.
    pub columns: Vec<(String, String)>,
    pub indexes: Vec<IndexMeta>,
    pub relations: Vec<RelationMeta>,
    pub blocked_operations: std::collections::HashSet<OperationKind>,
    pub handlers: Vec<FieldHandler>,
    /// Storage flavour this entity defaults to (e.g. `"ram"`, `"fs"`).
    pub flavour: String,
}

impl EntityMeta {
    pub fn handlers_for(&self, kind: HandlerKind) -> Vec<&FieldHandler> {
        let mut matched: Vec<&FieldHandler> =
            self.handlers.iter().filter(|h| h.kind == kind).collect();
        matched.sort_by_key(|h| (h.priority, h.group_priority));
        matched
    }

    pub fn is_blocked(&self, op: OperationKind) -> bool {
        self.blocked_operations.contains(&op)
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c.as_str())
    }
}

/// Builder used by entity types to register their metadata once, typically
/// from an associated `fn register() -> EntityMeta`.
pub struct EntityMetaBuilder {
    meta: EntityMeta,
}

impl EntityMetaBuilder {
    pub fn new(table: impl Into<String>, primary_key_field: impl Into<String>, kind: PkKind) -> Self {
        Self {
            meta: EntityMeta {
                table: table.into(),
                primary_key_field: primary_key_field.into(),
                primary_key_kind: kind,
                columns: Vec::new(),
                indexes: Vec::new(),
                relations: Vec::new(),
                blocked_operations: std::collections::HashSet::new(),
                handlers: Vec::new(),
                flavour: "ram".to_string(),
            },
        }
    }

    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.meta.columns.push((field.into(), column.into()));
        self
    }

    pub fn index(mut self, name: impl Into<String>, fields: Vec<(String, SortDirection)>) -> Self {
        self.meta.indexes.push(IndexMeta {
            name: name.into(),
            fields,
        });
        self
    }

    pub fn relation(mut self, relation: RelationMeta) -> Self {
        self.meta.relations.push(relation);
        self
    }

    pub fn block(mut self, op: OperationKind) -> Self {
        self.meta.blocked_operations.insert(op);
        self
    }

    pub fn flavour(mut self, flavour: impl Into<String>) -> Self {
        self.meta.flavour = flavour.into();
        self
    }

    /// Register the standard `created_at`/`updated_at`/`version` handlers:
    /// `on_create` stamps `created_at` (and `updated_at` to the same value);
    /// `on_update` bumps `version` by one and refreshes `updated_at`.
    pub fn with_timestamps_and_version(mut self) -> Self {
        self.meta.handlers.push(FieldHandler {
            field: "created_at".to_string(),
            kind: HandlerKind::OnCreate,
            priority: i32::MIN,
            group_priority: 0,
            apply: Arc::new(|record, ctx| {
                let now = serde_json::to_value(ctx.flags.timestamp).unwrap();
                record.insert("created_at".to_string(), now.clone());
                record.insert("updated_at".to_string(), now);
                record.insert("version".to_string(), serde_json::json!(1));
            }),
        });
        self.meta.handlers.push(FieldHandler {
            field: "updated_at".to_string(),
            kind: HandlerKind::OnUpdate,
            priority: i32::MIN,
            group_priority: 0,
            apply: Arc::new(|record, ctx| {
                let now = serde_json::to_value(ctx.flags.timestamp).unwrap();
                record.insert("updated_at".to_string(), now);
                let next_version = record
                    .get("version")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
                    + 1;
                record.insert("version".to_string(), serde_json::json!(next_version));
            }),
        });
        self
    }

    /// Register `created_by`/`updated_by` author-stamping handlers.
    pub fn with_authorship(mut self) -> Self {
        self.meta.handlers.push(FieldHandler {
            field: "created_by".to_string(),
            kind: HandlerKind::OnCreate,
            priority: i32::MIN + 1,
            group_priority: 0,
            apply: Arc::new(|record, ctx| {
                if let Some(user) = &ctx.flags.user {
                    record.insert("created_by".to_string(), serde_json::json!(user));
                    record.insert("updated_by".to_string(), serde_json::json!(user));
                }
            }),
        });
        self.meta.handlers.push(FieldHandler {
            field: "updated_by".to_string(),
            kind: HandlerKind::OnUpdate,
            priority: i32::MIN + 1,
            group_priority: 0,
            apply: Arc::new(|record, ctx| {
                if let Some(user) = &ctx.flags.user {
                    record.insert("updated_by".to_string(), serde_json::json!(user));
                }
            }),
        });
        self
    }

    /// Attach a user-defined field handler, composed in ascending
    /// `(priority, group_priority)` order alongside the built-ins.
    pub fn handler(
        mut self,
        field: impl Into<String>,
        kind: HandlerKind,
        priority: i32,
        group_priority: i32,
        apply: impl Fn(&mut Record, &OpContext) + Send + Sync + 'static,
    ) -> Self {
        self.meta.handlers.push(FieldHandler {
            field: field.into(),
            kind,
            priority,
            group_priority,
            apply: Arc::new(apply),
        });
        self
    }

    pub fn build(self) -> EntityMeta {
        self.meta
    }
}

/// Converts a typed model to and from the untyped [`Record`] shape the
/// adapter contract speaks.
///
/// `prepare` runs before a record reaches an adapter (after field handlers
/// have applied); `revert` runs after an adapter returns a raw record,
/// reconstructing the typed model. Implementors also supply their own
/// [`EntityMeta`] via `register()`, invoked once at process start.
pub trait Entity: Sized {
    fn table() -> &'static str;
    fn register() -> EntityMeta;
    fn prepare(&self) -> Record;
    fn revert(record: Record) -> anyhow::Result<Self>;
    fn primary_key(&self) -> crate::common::PkValue;
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

type Registry = RwLock<HashMap<TypeId, EntityMeta>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Error returned when a many-to-many relation declares `populate = true` on
/// both ends.
#[derive(Debug, thiserror::Error)]
#[error(
    "relation '{field}' on '{table}' and its counterpart on '{other_table}' both set populate=true"
)]
pub struct BidirectionalPopulateError {
    pub table: String,
    pub field: String,
    pub other_table: String,
}

/// Register (or replace) metadata for entity type `T`.
///
/// Subsequent registration for the same type overwrites the previous entry;
/// this is intentional, and used by tests that swap an entity's storage
/// flavour.
pub fn register<T: 'static>(meta: EntityMeta) -> Result<(), BidirectionalPopulateError> {
    check_bidirectional_populate(&meta)?;
    registry()
        .write()
        .expect("metadata registry poisoned")
        .insert(TypeId::of::<T>(), meta);
    Ok(())
}

/// Look up previously registered metadata for `T`.
pub fn lookup<T: 'static>() -> Option<EntityMeta> {
    registry()
        .read()
        .expect("metadata registry poisoned")
        .get(&TypeId::of::<T>())
        .cloned()
}

/// Look up metadata by table name, scanning the registry. Used by adapters
/// that only know the table name (e.g. when resolving a junction table's
/// owning side).
pub fn lookup_by_table(table: &str) -> Option<EntityMeta> {
    registry()
        .read()
        .expect("metadata registry poisoned")
        .values()
        .find(|m| m.table == table)
        .cloned()
}

/// Check whether `meta`'s many-to-many relations, combined with whatever is
/// already registered for their targets, would create a bidirectional
/// `populate = true` pair. Only catches the case where the target side is
/// already registered — order-dependent by construction, documented in
/// DESIGN.md.
fn check_bidirectional_populate(meta: &EntityMeta) -> Result<(), BidirectionalPopulateError> {
    use relation::RelationKind;

    for rel in &meta.relations {
        if rel.kind != RelationKind::ManyToMany || !rel.populate {
            continue;
        }
        if let Some(target) = lookup_by_table(&rel.target_table) {
            let reverse_populates = target
                .relations
                .iter()
                .any(|r| r.kind == RelationKind::ManyToMany && r.target_table == meta.table && r.populate);
            if reverse_populates {
                return Err(BidirectionalPopulateError {
                    table: meta.table.clone(),
                    field: rel.field.clone(),
                    other_table: rel.target_table.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::relation::{Cascade, RelationKind, RelationMeta};
    use super::*;

    struct Left;
    struct Right;

    fn base(table: &str) -> EntityMetaBuilder {
        EntityMetaBuilder::new(table, "id", PkKind::Uuid)
    }

    #[test]
    fn handlers_compose_in_priority_then_group_order() {
        let meta = base("widgets")
            .handler("b", HandlerKind::OnCreate, 5, 1, |_, _| {})
            .handler("a", HandlerKind::OnCreate, 5, 0, |_, _| {})
            .handler("c", HandlerKind::OnCreate, 1, 9, |_, _| {})
            .build();

        let ordered: Vec<&str> = meta
            .handlers_for(HandlerKind::OnCreate)
            .into_iter()
            .map(|h| h.field.as_str())
            .collect();
        assert_eq!(ordered, vec!["c", "a", "b"]);
    }

    #[test]
    fn blocked_operations_are_tracked() {
        let meta = base("widgets").block(OperationKind::Delete).build();
        assert!(meta.is_blocked(OperationKind::Delete));
        assert!(!meta.is_blocked(OperationKind::Create));
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let meta = base("lefts").build();
        register::<Left>(meta.clone()).unwrap();
        let found = lookup::<Left>().unwrap();
        assert_eq!(found.table, "lefts");
    }

    #[test]
    fn bidirectional_populate_is_rejected() {
        let left_meta = base("lefts")
            .relation(RelationMeta {
                field: "rights".to_string(),
                kind: RelationKind::ManyToMany,
                target_table: "rights".to_string(),
                on_update: Cascade::None,
                on_delete: Cascade::None,
                populate: true,
                owning: true,
            })
            .build();
        register::<Left>(left_meta).unwrap();

        let right_meta = base("rights")
            .relation(RelationMeta {
                field: "lefts".to_string(),
                kind: RelationKind::ManyToMany,
                target_table: "lefts".to_string(),
                on_update: Cascade::None,
                on_delete: Cascade::None,
                populate: true,
                owning: false,
            })
            .build();

        let err = register::<Right>(right_meta).unwrap_err();
        assert_eq!(err.table, "rights");
    }
}
