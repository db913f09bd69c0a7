//! Local transactional boundary for command handling.
//!
//! A [`UnitOfWork`] queues repository writes and takes custody of the domain
//! events recorded by the aggregates it writes. Nothing reaches a repository
//! before [`UnitOfWork::commit`], and events are released to the
//! [`EventPublisher`] only once every queued write has been committed.
//! Events the publisher rejects stay in the factory's [`Outbox`].

mod operation;
mod outbox;
mod savepoint;
mod session;

use std::sync::Arc;

use repository::{EntityRecord, OperationKind, RepositoryRegistry, RepositoryTransaction, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use operation::{BatchOperation, TrackedAggregate};
pub use outbox::Outbox;
pub use savepoint::Savepoint;
pub use session::{InMemorySessionStore, SessionStore, SuspendedTransaction};

use crate::aggregate::Aggregate;
use crate::command::MessageMetadata;
use crate::error::UnitOfWorkError;
use crate::event::{EventPublisher, EventRecord};

/// Result type for unit of work operations.
pub type Result<T> = std::result::Result<T, UnitOfWorkError>;

/// Unique identifier of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random transaction id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a unit of work. Draft is the only usable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfWorkState {
    Draft,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfWorkState::Draft => "Draft",
            UnitOfWorkState::Committed => "Committed",
            UnitOfWorkState::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub operations_executed: usize,
    pub events_published: usize,
}

/// Creates units of work sharing one repository registry and publisher.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    registry: Arc<RepositoryRegistry>,
    publisher: Arc<dyn EventPublisher>,
    outbox: Outbox,
}

impl UnitOfWorkFactory {
    /// Creates a new factory.
    pub fn new(registry: Arc<RepositoryRegistry>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            registry,
            publisher,
            outbox: Outbox::new(),
        }
    }

    /// Opens a unit of work for the message described by `metadata`.
    pub fn begin(&self, metadata: &MessageMetadata) -> UnitOfWork {
        UnitOfWork::new(
            metadata.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.publisher),
        )
        .with_outbox(self.outbox.clone())
    }

    /// Rebuilds a suspended unit of work.
    pub async fn resume(
        &self,
        transaction_id: TransactionId,
        store: &dyn SessionStore,
    ) -> Result<UnitOfWork> {
        UnitOfWork::resume(
            transaction_id,
            store,
            Arc::clone(&self.registry),
            Arc::clone(&self.publisher),
        )
        .await
        .map(|uow| uow.with_outbox(self.outbox.clone()))
    }

    /// Returns the repository registry.
    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    /// Returns the event publisher.
    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Returns the committed events still waiting for publication.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Publishes the waiting events and returns how many were released.
    pub async fn flush_outbox(&self) -> Result<usize> {
        Ok(self.outbox.flush(self.publisher.as_ref()).await?)
    }
}

impl std::fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// A batch of repository writes and the events they release.
///
/// Owned by a single command invocation and passed `&mut` to its handler.
pub struct UnitOfWork {
    id: TransactionId,
    metadata: MessageMetadata,
    state: UnitOfWorkState,
    operations: Vec<BatchOperation>,
    tracked: Vec<TrackedAggregate>,
    savepoints: Vec<Savepoint>,
    registry: Arc<RepositoryRegistry>,
    publisher: Arc<dyn EventPublisher>,
    outbox: Outbox,
}

impl UnitOfWork {
    /// Opens a new draft unit of work.
    pub fn new(
        metadata: MessageMetadata,
        registry: Arc<RepositoryRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            metadata,
            state: UnitOfWorkState::Draft,
            operations: Vec::new(),
            tracked: Vec::new(),
            savepoints: Vec::new(),
            registry,
            publisher,
            outbox: Outbox::new(),
        }
    }

    /// Shares `outbox` with other units of work.
    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self
    }

    /// Returns the outbox holding events the publisher rejected.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the metadata of the message this unit of work serves.
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Returns true while the unit of work accepts registrations.
    pub fn is_active(&self) -> bool {
        self.state == UnitOfWorkState::Draft
    }

    /// Returns the queued operations in registration order.
    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Returns the savepoint stack, oldest first.
    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    /// Returns the number of events waiting for the commit.
    pub fn pending_event_count(&self) -> usize {
        self.tracked.iter().map(|t| t.events.len()).sum()
    }

    /// Queues the insertion of a new aggregate.
    pub fn register_new<A: Aggregate>(&mut self, aggregate: &mut A, repository: &str) -> Result<()> {
        self.register(OperationKind::Insert, aggregate, repository)
    }

    /// Queues the update of an existing aggregate.
    pub fn register_updated<A: Aggregate>(
        &mut self,
        aggregate: &mut A,
        repository: &str,
    ) -> Result<()> {
        self.register(OperationKind::Update, aggregate, repository)
    }

    /// Queues the removal of an existing aggregate.
    pub fn register_deleted<A: Aggregate>(
        &mut self,
        aggregate: &mut A,
        repository: &str,
    ) -> Result<()> {
        self.register(OperationKind::Delete, aggregate, repository)
    }

    fn register<A: Aggregate>(
        &mut self,
        kind: OperationKind,
        aggregate: &mut A,
        repository: &str,
    ) -> Result<()> {
        self.ensure_draft()?;
        if !self.registry.contains(repository) {
            return Err(UnitOfWorkError::UnknownRepository(repository.to_string()));
        }

        let pending = aggregate.pending_events_mut().take();

        let version = aggregate.version();
        let mut record =
            EntityRecord::from_state(aggregate.id().clone(), A::aggregate_type(), version, &*aggregate)?;
        if kind != OperationKind::Insert {
            // The version the aggregate had before the events taken above.
            let read = version.as_i64() - pending.len() as i64;
            record = record.with_expected_version(Version::new(read));
        }

        let events = pending
            .iter()
            .map(|event| EventRecord::from_event(&*aggregate, event, &self.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            transaction_id = %self.id,
            operation = %kind,
            aggregate_id = %record.aggregate_id,
            repository,
            events = events.len(),
            "Operation queued"
        );

        if !events.is_empty() {
            self.tracked.push(TrackedAggregate {
                aggregate_id: record.aggregate_id.clone(),
                events,
            });
        }
        self.operations
            .push(BatchOperation::new(kind, record, repository));
        Ok(())
    }

    /// Pushes a savepoint onto the stack and returns it.
    pub fn create_savepoint(&mut self, name: impl Into<String>) -> Result<Savepoint> {
        self.ensure_draft()?;
        let savepoint = Savepoint::new(name, self.id, self.operations.len(), self.tracked.len());
        self.savepoints.push(savepoint.clone());
        Ok(savepoint)
    }

    /// Discards every operation and tracked event queued after `savepoint`.
    ///
    /// Savepoints created after it are discarded too; `savepoint` itself stays
    /// on the stack and can be rolled back to again.
    pub fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        self.ensure_draft()?;
        let position = self.savepoint_position(savepoint)?;

        self.operations.truncate(savepoint.operation_count);
        self.tracked.truncate(savepoint.tracked_count);
        self.savepoints.truncate(position + 1);

        tracing::debug!(
            transaction_id = %self.id,
            savepoint = %savepoint.name,
            operations = self.operations.len(),
            "Rolled back to savepoint"
        );
        Ok(())
    }

    /// Removes `savepoint` and every later one without touching operations.
    pub fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        self.ensure_draft()?;
        let position = self.savepoint_position(savepoint)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    fn savepoint_position(&self, savepoint: &Savepoint) -> Result<usize> {
        if savepoint.transaction_id != self.id {
            return Err(self.unknown_savepoint(savepoint));
        }
        self.savepoints
            .iter()
            .position(|sp| sp.id == savepoint.id)
            .ok_or_else(|| self.unknown_savepoint(savepoint))
    }

    fn unknown_savepoint(&self, savepoint: &Savepoint) -> UnitOfWorkError {
        UnitOfWorkError::UnknownSavepoint {
            name: savepoint.name.clone(),
            transaction_id: self.id,
        }
    }

    /// Executes every queued operation, then publishes the collected events.
    ///
    /// Operations run in registration order inside one repository transaction
    /// per touched repository. If any operation fails, every repository
    /// transaction is rolled back, the unit of work moves to RolledBack and
    /// the error is returned. Repository commits are not coordinated: when
    /// one fails, the repositories committed before it keep their writes
    /// (see [`RepositoryTransaction::commit`]). If publishing fails after the
    /// writes have been committed, the unit of work stays Committed, the
    /// events stay in the [`Outbox`] and [`UnitOfWorkError::Publish`] is
    /// returned.
    #[tracing::instrument(
        skip(self),
        fields(transaction_id = %self.id, operations = self.operations.len())
    )]
    pub async fn commit(&mut self) -> Result<CommitOutcome> {
        self.ensure_draft()?;

        let operations = std::mem::take(&mut self.operations);
        if let Err(e) = self.write_all(&operations).await {
            tracing::warn!(error = %e, "Commit failed, rolling back");
            self.discard(UnitOfWorkState::RolledBack);
            return Err(e);
        }

        let events: Vec<EventRecord> = std::mem::take(&mut self.tracked)
            .into_iter()
            .flat_map(|t| t.events)
            .collect();
        let events_published = events.len();
        self.discard(UnitOfWorkState::Committed);
        metrics::counter!("uow_commits_total").increment(1);

        self.outbox.release(self.publisher.as_ref(), events).await?;

        tracing::debug!(events = events_published, "Unit of work committed");
        Ok(CommitOutcome {
            operations_executed: operations.len(),
            events_published,
        })
    }

    async fn write_all(&self, operations: &[BatchOperation]) -> Result<()> {
        let mut transactions: Vec<(&str, Box<dyn RepositoryTransaction>)> = Vec::new();

        let staged = self.stage(operations, &mut transactions).await;
        if let Err(e) = staged {
            rollback_all(transactions).await;
            return Err(e);
        }

        let mut transactions = transactions.into_iter();
        let mut committed = 0usize;
        while let Some((name, tx)) = transactions.next() {
            if let Err(e) = tx.commit().await {
                tracing::error!(
                    repository = name,
                    committed_repositories = committed,
                    error = %e,
                    "Repository commit failed"
                );
                rollback_all(transactions).await;
                return Err(e.into());
            }
            committed += 1;
        }
        Ok(())
    }

    async fn stage<'a>(
        &self,
        operations: &'a [BatchOperation],
        transactions: &mut Vec<(&'a str, Box<dyn RepositoryTransaction>)>,
    ) -> Result<()> {
        for operation in operations {
            let name = operation.repository_name.as_str();
            let found = transactions.iter().position(|(n, _)| *n == name);
            let index = match found {
                Some(index) => index,
                None => {
                    let repository = self
                        .registry
                        .get(name)
                        .ok_or_else(|| UnitOfWorkError::UnknownRepository(name.to_string()))?;
                    transactions.push((name, repository.begin().await?));
                    transactions.len() - 1
                }
            };
            transactions[index]
                .1
                .execute(operation.kind, operation.record.clone())
                .await?;
        }
        Ok(())
    }

    /// Discards every queued operation and tracked event.
    ///
    /// Rolling back twice is a no-op. A committed unit of work cannot be
    /// rolled back.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            UnitOfWorkState::RolledBack => Ok(()),
            UnitOfWorkState::Committed => Err(self.invalid_state()),
            UnitOfWorkState::Draft => {
                tracing::debug!(
                    transaction_id = %self.id,
                    operations = self.operations.len(),
                    "Unit of work rolled back"
                );
                self.discard(UnitOfWorkState::RolledBack);
                Ok(())
            }
        }
    }

    fn discard(&mut self, state: UnitOfWorkState) {
        self.operations.clear();
        self.tracked.clear();
        self.savepoints.clear();
        self.state = state;
        if state == UnitOfWorkState::RolledBack {
            metrics::counter!("uow_rollbacks_total").increment(1);
        }
    }

    /// Serializes the unit of work into `store` and consumes it.
    pub async fn suspend(self, store: &dyn SessionStore) -> Result<TransactionId> {
        self.ensure_draft()?;
        let suspended = SuspendedTransaction {
            transaction_id: self.id,
            metadata: self.metadata,
            operations: self.operations,
            tracked: self.tracked,
            savepoints: self.savepoints,
        };
        let data = serde_json::to_string(&suspended)?;
        store.put(self.id, data).await;
        tracing::debug!(transaction_id = %self.id, "Unit of work suspended");
        Ok(self.id)
    }

    /// Rebuilds a draft unit of work previously suspended into `store`.
    ///
    /// The entry is removed from the store.
    pub async fn resume(
        transaction_id: TransactionId,
        store: &dyn SessionStore,
        registry: Arc<RepositoryRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let data = store
            .take(&transaction_id)
            .await
            .ok_or(UnitOfWorkError::SessionNotFound(transaction_id))?;
        let suspended: SuspendedTransaction = serde_json::from_str(&data)?;

        tracing::debug!(%transaction_id, "Unit of work resumed");
        Ok(Self {
            id: suspended.transaction_id,
            metadata: suspended.metadata,
            state: UnitOfWorkState::Draft,
            operations: suspended.operations,
            tracked: suspended.tracked,
            savepoints: suspended.savepoints,
            registry,
            publisher,
            outbox: Outbox::new(),
        })
    }

    fn ensure_draft(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(self.invalid_state())
        }
    }

    fn invalid_state(&self) -> UnitOfWorkError {
        UnitOfWorkError::InvalidState {
            transaction_id: self.id,
            state: self.state,
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("operations", &self.operations.len())
            .field("savepoints", &self.savepoints.len())
            .finish_non_exhaustive()
    }
}

async fn rollback_all<'a, I>(transactions: I)
where
    I: IntoIterator<Item = (&'a str, Box<dyn RepositoryTransaction>)>,
{
    for (name, tx) in transactions {
        if let Err(e) = tx.rollback().await {
            tracing::error!(repository = name, error = %e, "Repository rollback failed");
        }
    }
}
