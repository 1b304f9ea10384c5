//! Shared primitives for the quarry persistence framework: entity metadata,
//! the storage adapter contract, the query builder/parser, advisory locks,
//! sequence data types, pagination, and the error taxonomy.
//!
//! This crate has no opinion on where data actually lives — see
//! `quarry-memory` and `quarry-fs` for adapters, and `quarry-repo` for the
//! repository layer that ties an entity's metadata to a chosen adapter.

pub mod adapter;
pub mod common;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod paginate;
pub mod query;
pub mod sequence;

pub use common::{Flags, OpContext, OperationKind, PkKind, PkValue, Record};
pub use error::{QuarryError, Result};
pub use metadata::{Entity, EntityMeta, EntityMetaBuilder};
