//! Relation cascades.
//!
//! Cascades operate on raw tables rather than typed entities: a relation
//! only records its target's table name, so walking a cascade means querying
//! that table directly through the same `Adapter` the owning side uses,
//! without needing to know the target's Rust type. This only reaches
//! targets stored on the same adapter instance; cross-adapter relations are
//! out of scope.
//!
//! Foreign keys follow one fixed convention: the "many" side of a
//! one-to-many relation stores the owning table's id under
//! `"{owning_table}_id"`. Many-to-many relations go through the
//! [`JunctionTable`] both sides compute independently.

use quarry_core::adapter::Adapter;
use quarry_core::common::{OpContext, PkValue};
use quarry_core::error::Result;
use quarry_core::metadata::relation::{Cascade, JunctionTable, RelationKind};
use quarry_core::metadata::EntityMeta;
use quarry_core::query::compiler::{self};
use quarry_core::query::{Attr, Builder};

/// Walk `meta`'s relations and cascade the delete of `id` onto related
/// tables. Only relations whose `on_delete` is `Cascade` are followed;
/// relations left at `None` leave related rows (and junction rows) exactly
/// as they were.
pub async fn cascade_delete(adapter: &dyn Adapter, meta: &EntityMeta, id: &PkValue, ctx: &OpContext) -> Result<()> {
    for relation in &meta.relations {
        match relation.kind {
            RelationKind::OneToOne | RelationKind::OneToMany => {
                if relation.on_delete != Cascade::Cascade {
                    continue;
                }
                let fk = format!("{}_id", meta.table);
                let stmt = Builder::from(relation.target_table.clone())
                    .filter(Attr::new(&fk).eq(id.to_string()))
                    .build();
                let plan = compiler::compile(stmt);
                let rows = adapter.raw(&plan, ctx).await?.into_rows()?;
                for row in rows {
                    if let Some(child_id) = row.get("id") {
                        if let Ok(child_pk) = serde_json::from_value::<PkValue>(child_id.clone()) {
                            let _ = adapter.delete(&relation.target_table, &child_pk, ctx).await;
                        }
                    }
                }
            }
            RelationKind::ManyToMany => {
                let junction = JunctionTable::synthesize(&meta.table, &relation.target_table);
                let (own_column, other_column) = if junction.column_a == format!("{}_id", meta.table) {
                    (junction.column_a.clone(), junction.column_b.clone())
                } else {
                    (junction.column_b.clone(), junction.column_a.clone())
                };

                let stmt = Builder::from(junction.name.clone())
                    .filter(Attr::new(&own_column).eq(id.to_string()))
                    .build();
                let plan = compiler::compile(stmt);
                let junction_rows = adapter.raw(&plan, ctx).await?.into_rows()?;

                for row in &junction_rows {
                    if let Some(jid) = row.get("id") {
                        if let Ok(jpk) = serde_json::from_value::<PkValue>(jid.clone()) {
                            let _ = adapter.delete(&junction.name, &jpk, ctx).await;
                        }
                    }
                }

                if relation.owning && relation.on_delete == Cascade::Cascade {
                    for row in &junction_rows {
                        if let Some(other_id) = row.get(&other_column) {
                            if let Ok(other_pk) = serde_json::from_value::<PkValue>(other_id.clone()) {
                                let _ = adapter.delete(&relation.target_table, &other_pk, ctx).await;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
