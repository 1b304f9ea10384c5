//! Sequence allocator data types.
//!
//! A sequence is itself an entity, persisted through the same adapter
//! machinery as any other table, so the allocator that actually drives it
//! lives in `quarry-repo`, which depends on this crate. What lives here is
//! the shape of a sequence record and its configuration, shared by both the
//! allocator and anything that needs to reason about sequence metadata
//! without depending on the repository layer.

use serde::{Deserialize, Serialize};

use crate::common::PkKind;
use crate::metadata::{EntityMeta, EntityMetaBuilder};

/// The underlying value domain a sequence produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    Number,
    BigInt,
    Uuid,
    Serial,
    String,
}

impl From<SequenceType> for PkKind {
    fn from(value: SequenceType) -> Self {
        match value {
            SequenceType::Number => PkKind::Number,
            SequenceType::BigInt => PkKind::BigInt,
            SequenceType::Uuid => PkKind::Uuid,
            SequenceType::Serial => PkKind::Serial,
            SequenceType::String => PkKind::String,
        }
    }
}

/// Configuration supplied when declaring a sequence.
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    pub name: String,
    pub kind: SequenceType,
    pub start_with: i64,
    pub increment_by: i64,
    pub cycle: bool,
}

impl SequenceOptions {
    pub fn new(name: impl Into<String>, kind: SequenceType) -> Self {
        Self {
            name: name.into(),
            kind,
            start_with: 1,
            increment_by: 1,
            cycle: false,
        }
    }
}

/// The durable record backing a sequence. One row per declared sequence
/// name, kept in the reserved `__quarry_sequences` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub name: String,
    pub kind: SequenceType,
    pub current: i64,
    pub increment_by: i64,
    pub cycle: bool,
    pub start_with: i64,
}

impl SequenceRecord {
    pub const TABLE: &'static str = "__quarry_sequences";

    pub fn from_options(options: &SequenceOptions) -> Self {
        Self {
            name: options.name.clone(),
            kind: options.kind,
            current: options.start_with - options.increment_by,
            increment_by: options.increment_by,
            cycle: options.cycle,
            start_with: options.start_with,
        }
    }

    pub fn register() -> EntityMeta {
        EntityMetaBuilder::new(Self::TABLE, "name", PkKind::String)
            .column("name", "name")
            .column("kind", "kind")
            .column("current", "current")
            .column("increment_by", "increment_by")
            .column("cycle", "cycle")
            .column("start_with", "start_with")
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_options_seeds_current_one_increment_below_start() {
        let opts = SequenceOptions::new("order_number", SequenceType::Number);
        let record = SequenceRecord::from_options(&opts);
        assert_eq!(record.current, 0);
        assert_eq!(record.increment_by, 1);
    }
}
