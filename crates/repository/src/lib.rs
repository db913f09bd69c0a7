//! Repository port consumed by the unit of work.
//!
//! Repositories persist serialized aggregate state ([`EntityRecord`]). Writes
//! always go through a [`RepositoryTransaction`] so that a unit of work can
//! apply a batch of operations all-or-nothing.

pub mod error;
pub mod memory;
pub mod record;
pub mod registry;
pub mod store;

pub use common::AggregateId;
pub use error::{RepositoryError, Result};
pub use memory::{AppliedOperation, InMemoryRepository};
pub use record::{EntityRecord, OperationKind, Version};
pub use registry::RepositoryRegistry;
pub use store::{Repository, RepositoryExt, RepositoryTransaction};
