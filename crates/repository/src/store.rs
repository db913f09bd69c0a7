use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{AggregateId, EntityRecord, OperationKind, Result};

/// Core trait for repository implementations.
///
/// A repository stores the latest [`EntityRecord`] of each aggregate. Reads go
/// straight to committed state; writes are staged in a transaction opened with
/// [`Repository::begin`] and become visible only once that transaction commits.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Opens a new write transaction.
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>>;

    /// Retrieves the committed record for an aggregate.
    ///
    /// Returns None if the aggregate doesn't exist.
    async fn get(&self, aggregate_id: &AggregateId) -> Result<Option<EntityRecord>>;
}

/// A write transaction against a single repository.
///
/// Each operation either succeeds or fails immediately. Nothing is visible to
/// readers until [`RepositoryTransaction::commit`] returns successfully.
#[async_trait]
pub trait RepositoryTransaction: Send {
    /// Stages the insertion of a new entity.
    async fn add(&mut self, record: EntityRecord) -> Result<()>;

    /// Stages the replacement of an existing entity.
    async fn update(&mut self, record: EntityRecord) -> Result<()>;

    /// Stages the removal of an existing entity.
    async fn delete(&mut self, record: EntityRecord) -> Result<()>;

    /// Makes every staged operation visible atomically.
    ///
    /// Atomicity covers this repository only. A unit of work writing to
    /// several repositories commits them one after another, so a failure here
    /// leaves the repositories committed before it in place. Implementations
    /// should report conflicts and constraint violations while staging, and
    /// fail here only for checks that need the commit lock.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every staged operation.
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Stages an operation of the given kind.
    async fn execute(&mut self, kind: OperationKind, record: EntityRecord) -> Result<()> {
        match kind {
            OperationKind::Insert => self.add(record).await,
            OperationKind::Update => self.update(record).await,
            OperationKind::Delete => self.delete(record).await,
        }
    }
}

/// Extension trait providing typed reads for repositories.
#[async_trait]
pub trait RepositoryExt: Repository {
    /// Loads and deserializes the committed state of an aggregate.
    async fn load<T: DeserializeOwned + Send>(&self, aggregate_id: &AggregateId) -> Result<Option<T>> {
        match self.get(aggregate_id).await? {
            Some(record) => Ok(Some(record.to_state()?)),
            None => Ok(None),
        }
    }

    /// Checks if an aggregate exists.
    async fn exists(&self, aggregate_id: &AggregateId) -> Result<bool> {
        Ok(self.get(aggregate_id).await?.is_some())
    }
}

// Blanket implementation for all Repository implementations
impl<T: Repository + ?Sized> RepositoryExt for T {}
