//! The public error taxonomy shared by every adapter, repository and the task
//! engine.
//!
//! Internal plumbing uses `anyhow::Result` and `.context(...)` to build up a
//! human-readable trail; at the adapter boundary these are normalised into a
//! [`QuarryError`] via [`Adapter::parse_error`](crate::adapter::Adapter::parse_error)
//! so callers can match on `Kind` rather than parse messages.

use crate::common::OperationKind;

/// Canonical error kinds surfaced across the adapter/repository/task-engine
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("record already exists in table '{table}' with id {id}")]
    Conflict { table: String, id: String },

    #[error("no record found in table '{table}' with id {id}")]
    NotFound { table: String, id: String },

    #[error("entity validation failed: {0}")]
    Validation(String),

    #[error("operation {operation:?} is blocked on table '{table}'")]
    OperationBlocked {
        table: String,
        operation: OperationKind,
    },

    #[error("query error: {0}")]
    Query(String),

    #[error("paging error: {0}")]
    Paging(String),

    #[error("adapter does not support: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("lease on task {task_id} was lost before completion")]
    StaleLease { task_id: uuid::Uuid },
}

pub type Result<T> = std::result::Result<T, QuarryError>;

impl QuarryError {
    pub fn conflict(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn operation_blocked(table: impl Into<String>, operation: OperationKind) -> Self {
        Self::OperationBlocked {
            table: table.into(),
            operation,
        }
    }

    /// Best-effort classification used by callers that only care about the
    /// broad recovery strategy, not the exact variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
