//! Relation descriptors and many-to-many junction table synthesis.

use serde::{Deserialize, Serialize};

/// The cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// What happens to the related side when the owning side is updated or
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cascade {
    None,
    Cascade,
}

/// A declared relation from one entity to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMeta {
    pub field: String,
    pub kind: RelationKind,
    /// Table name of the related entity.
    pub target_table: String,
    pub on_update: Cascade,
    pub on_delete: Cascade,
    /// Whether reads should eagerly populate this relation.
    pub populate: bool,
    /// For `ManyToMany`, whether this side owns the junction rows (the
    /// owning side deletes junction rows *and* target rows on cascade
    /// delete; the non-owning side only removes junction rows).
    pub owning: bool,
}

/// The deterministic junction table descriptor synthesised for a many-to-many
/// relation.
///
/// Name and column order are derived purely from the two table names so both
/// sides of the relation agree on the same junction table without needing a
/// shared registration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionTable {
    pub name: String,
    pub column_a: String,
    pub column_b: String,
}

impl JunctionTable {
    /// Build the junction descriptor for a many-to-many relation between
    /// `table_a` and `table_b`. The pair is sorted lexicographically so both
    /// sides of the relation compute the same table name independently.
    pub fn synthesize(table_a: &str, table_b: &str) -> Self {
        let (first, second) = if table_a <= table_b {
            (table_a, table_b)
        } else {
            (table_b, table_a)
        };
        Self {
            name: format!("__junction_{first}_{second}"),
            column_a: format!("{first}_id"),
            column_b: format!("{second}_id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junction_name_is_order_independent() {
        let a = JunctionTable::synthesize("users", "groups");
        let b = JunctionTable::synthesize("groups", "users");
        assert_eq!(a, b);
        assert_eq!(a.name, "__junction_groups_users");
    }
}
