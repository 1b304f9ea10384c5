//! Types shared across metadata, the adapter contract, the query engine and
//! the repository layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored record, represented as a plain structured document.
///
/// Adapters never see typed entities directly: the repository `prepare`s a
/// model into a `Record` before handing it to the adapter, and `revert`s a
/// `Record` back into a model after the adapter returns it. Keeping the
/// on-the-wire shape untyped is what lets the filesystem adapter round-trip
/// records through JSON without any per-entity codegen.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The kind of CRUD operation being guarded, hooked or cascaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// The declared type of a primary key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkKind {
    String,
    Number,
    BigInt,
    Uuid,
    Serial,
}

/// A serialised primary key value.
///
/// Numbers and big integers are kept as `i64`: the core budget targets
/// application-scale entity counts, not arbitrary-precision ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PkValue {
    String(String),
    Number(i64),
    BigInt(i64),
    Uuid(Uuid),
    /// A zero-padded 14-digit decimal string, monotonic in allocation order.
    Serial(String),
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) | Self::BigInt(n) => write!(f, "{n}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Serial(s) => f.write_str(s),
        }
    }
}

impl PkValue {
    /// Format a serial number as the zero-padded 14-digit string required by
    /// invariant (v).
    pub fn serial(n: u64) -> Self {
        Self::Serial(format!("{n:0>14}"))
    }
}

/// The complete set of operation flags an adapter attaches to every call.
///
/// `flags(op, type, partial)` always stamps a fresh correlation id;
/// everything else is carried through from the caller-supplied partial flags
/// (notably the acting user, used by the `createdBy`/`updatedBy` hooks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flags {
    pub operation: OperationKind,
    pub correlation_id: Uuid,
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Free-form extras a caller wants to thread through to observers.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Flags {
    pub fn new(operation: OperationKind, user: Option<String>) -> Self {
        Self {
            operation,
            correlation_id: Uuid::new_v4(),
            user,
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }
}

/// Per-call context threaded from `Repository` through `Adapter`.
///
/// Every mutation is stamped with a typed context value explicitly passed
/// through the call chain, rather than relying on ambient state.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub flags: Flags,
    /// Set when the call is part of a transaction-like grouped operation
    /// (e.g. a bulk `createAll`); used to correlate rollback attempts.
    pub batch_id: Option<Uuid>,
}

impl OpContext {
    pub fn new(operation: OperationKind, user: Option<String>) -> Self {
        Self {
            flags: Flags::new(operation, user),
            batch_id: None,
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.flags.operation
    }
}
