//! The repository layer: binds an [`quarry_core::metadata::Entity`] to
//! a chosen [`quarry_core::adapter::Adapter`] and provides the CRUD/bulk/
//! query surface application code actually calls, plus the durable
//! sequence allocator.

pub mod cascade;
pub mod observer;
pub mod repository;
pub mod sequence;

pub use observer::{Observer, ObserverList};
pub use repository::Repository;
pub use sequence::Sequence;
