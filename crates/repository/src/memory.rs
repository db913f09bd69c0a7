use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EntityRecord, OperationKind, RepositoryError, Result, Version,
    store::{Repository, RepositoryTransaction},
};

/// An operation that was committed to an [`InMemoryRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOperation {
    pub kind: OperationKind,
    pub aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// Aggregates whose writes always fail.
    failing_ids: HashSet<AggregateId>,
    /// Number of upcoming writes that fail before writes succeed again.
    fail_next: u32,
    /// Every write fails while set.
    unavailable: bool,
    /// Number of upcoming commits that fail after staging succeeded.
    fail_next_commits: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<AggregateId, EntityRecord>,
    log: Vec<AppliedOperation>,
    failures: FailurePlan,
}

/// In-memory repository implementation for testing.
///
/// Transactions stage their writes locally and apply them under a single
/// write lock on commit, so readers never observe a partial batch. Commit
/// fails with [`RepositoryError::ConcurrencyConflict`] when another
/// transaction changed any entity this one touched. Failures can be injected
/// to exercise rollback and retry paths.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRepository {
    /// Creates a new empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed entities.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Returns true if no entity has been committed.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Returns every committed operation, in commit order.
    pub async fn operations(&self) -> Vec<AppliedOperation> {
        self.state.read().await.log.clone()
    }

    /// Makes every write touching `aggregate_id` fail.
    pub async fn fail_writes_for(&self, aggregate_id: impl Into<AggregateId>) {
        self.state
            .write()
            .await
            .failures
            .failing_ids
            .insert(aggregate_id.into());
    }

    /// Makes the next `count` writes fail with a transient error.
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.write().await.failures.fail_next = count;
    }

    /// Makes the next `count` commits fail with a transient error.
    pub async fn fail_next_commits(&self, count: u32) {
        self.state.write().await.failures.fail_next_commits = count;
    }

    /// Makes every write fail with a transient error while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.failures.unavailable = unavailable;
    }

    /// Removes every injected failure.
    pub async fn clear_failures(&self) {
        self.state.write().await.failures = FailurePlan::default();
    }

    /// Clears all records, the operation log and injected failures.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            overlay: HashMap::new(),
            reads: HashMap::new(),
        }))
    }

    async fn get(&self, aggregate_id: &AggregateId) -> Result<Option<EntityRecord>> {
        Ok(self.state.read().await.records.get(aggregate_id).cloned())
    }
}

/// Staged writes against an [`InMemoryRepository`].
struct InMemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    staged: Vec<(OperationKind, EntityRecord)>,
    /// Version of each aggregate as seen by this transaction, `None` if absent.
    overlay: HashMap<AggregateId, Option<Version>>,
    /// Committed version of each aggregate when this transaction first touched it.
    reads: HashMap<AggregateId, Option<Version>>,
}

impl InMemoryTransaction {
    async fn stage(&mut self, kind: OperationKind, record: EntityRecord) -> Result<()> {
        let current = {
            let mut state = self.state.write().await;
            check_injected_failure(&mut state.failures, &record.aggregate_id)?;
            let committed = state.records.get(&record.aggregate_id).map(|r| r.version);
            self.reads
                .entry(record.aggregate_id.clone())
                .or_insert(committed);
            match self.overlay.get(&record.aggregate_id) {
                Some(seen) => *seen,
                None => committed,
            }
        };

        match (kind, current) {
            (OperationKind::Insert, Some(_)) => {
                return Err(RepositoryError::AlreadyExists {
                    aggregate_type: record.aggregate_type,
                    aggregate_id: record.aggregate_id,
                });
            }
            (OperationKind::Update | OperationKind::Delete, None) => {
                return Err(RepositoryError::NotFound {
                    aggregate_type: record.aggregate_type,
                    aggregate_id: record.aggregate_id,
                });
            }
            (OperationKind::Update | OperationKind::Delete, Some(actual))
                if record.expected_version.is_some_and(|v| v != actual) =>
            {
                return Err(RepositoryError::ConcurrencyConflict {
                    aggregate_id: record.aggregate_id,
                    expected: record.expected_version,
                    actual: Some(actual),
                });
            }
            _ => {}
        }

        let seen = (kind != OperationKind::Delete).then_some(record.version);
        self.overlay.insert(record.aggregate_id.clone(), seen);
        self.staged.push((kind, record));
        Ok(())
    }
}

/// Fails if a committed entity no longer has the version `reads` recorded.
fn validate_reads(
    records: &HashMap<AggregateId, EntityRecord>,
    reads: &HashMap<AggregateId, Option<Version>>,
) -> Result<()> {
    for (aggregate_id, expected) in reads {
        let actual = records.get(aggregate_id).map(|r| r.version);
        if actual != *expected {
            return Err(RepositoryError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected: *expected,
                actual,
            });
        }
    }
    Ok(())
}

fn check_injected_failure(failures: &mut FailurePlan, aggregate_id: &AggregateId) -> Result<()> {
    if failures.unavailable {
        return Err(RepositoryError::Unavailable(
            "repository marked unavailable".to_string(),
        ));
    }
    if failures.fail_next > 0 {
        failures.fail_next -= 1;
        return Err(RepositoryError::Unavailable(
            "injected transient failure".to_string(),
        ));
    }
    if failures.failing_ids.contains(aggregate_id) {
        return Err(RepositoryError::Unavailable(format!(
            "injected failure for {aggregate_id}"
        )));
    }
    Ok(())
}

#[async_trait]
impl RepositoryTransaction for InMemoryTransaction {
    async fn add(&mut self, record: EntityRecord) -> Result<()> {
        self.stage(OperationKind::Insert, record).await
    }

    async fn update(&mut self, record: EntityRecord) -> Result<()> {
        self.stage(OperationKind::Update, record).await
    }

    async fn delete(&mut self, record: EntityRecord) -> Result<()> {
        self.stage(OperationKind::Delete, record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().await;
        if state.failures.fail_next_commits > 0 {
            state.failures.fail_next_commits -= 1;
            return Err(RepositoryError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }
        if let Err(e) = validate_reads(&state.records, &self.reads) {
            tracing::debug!(error = %e, "in-memory transaction rejected");
            return Err(e);
        }
        let count = self.staged.len();
        for (kind, record) in self.staged {
            state.log.push(AppliedOperation {
                kind,
                aggregate_id: record.aggregate_id.clone(),
            });
            match kind {
                OperationKind::Insert | OperationKind::Update => {
                    state.records.insert(record.aggregate_id.clone(), record);
                }
                OperationKind::Delete => {
                    state.records.remove(&record.aggregate_id);
                }
            }
        }
        tracing::debug!(operations = count, "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!(
            operations = self.staged.len(),
            "in-memory transaction rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Version;
    use crate::store::RepositoryExt;

    fn record(id: &str, name: &str) -> EntityRecord {
        EntityRecord::from_state(
            AggregateId::from(id),
            "Partner",
            Version::new(1),
            &serde_json::json!({ "name": name }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();

        assert!(repo.is_empty().await);
        tx.commit().await.unwrap();

        assert_eq!(repo.len().await, 1);
        let stored: serde_json::Value = repo.load(&AggregateId::from("P1")).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Acme");
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(repo.is_empty().await);
        assert!(repo.operations().await.is_empty());
    }

    #[tokio::test]
    async fn insert_of_existing_entity_fails() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        let result = tx.add(record("P1", "Acme")).await;

        assert!(matches!(result, Err(RepositoryError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn update_of_missing_entity_fails() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let result = tx.update(record("P1", "Acme")).await;

        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn staged_delete_hides_entity_from_later_operations() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.delete(record("P1", "Acme")).await.unwrap();
        let result = tx.update(record("P1", "Acme")).await;
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn operations_are_logged_in_commit_order() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.update(record("P1", "Acme Corp")).await.unwrap();
        tx.add(record("P2", "Globex")).await.unwrap();
        tx.delete(record("P2", "Globex")).await.unwrap();
        tx.commit().await.unwrap();

        let kinds: Vec<_> = repo.operations().await.into_iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Insert,
                OperationKind::Update,
                OperationKind::Insert,
                OperationKind::Delete
            ]
        );
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let repo = InMemoryRepository::new();
        repo.fail_writes_for("P2").await;

        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        let err = tx.add(record("P2", "Globex")).await.unwrap_err();
        assert!(err.is_transient());

        repo.clear_failures().await;
        repo.fail_next_writes(1).await;
        let mut tx = repo.begin().await.unwrap();
        assert!(tx.add(record("P3", "Initech")).await.is_err());
        assert!(tx.add(record("P3", "Initech")).await.is_ok());

        repo.set_unavailable(true).await;
        let mut tx = repo.begin().await.unwrap();
        assert!(tx.add(record("P4", "Umbrella")).await.is_err());
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_staged_writes() {
        let repo = InMemoryRepository::new();
        repo.fail_next_commits(1).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_transient());
        assert!(repo.is_empty().await);

        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_id_commit_once() {
        let repo = InMemoryRepository::new();
        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        first.add(record("P1", "Acme")).await.unwrap();
        second.add(record("P1", "Acme twin")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::ConcurrencyConflict { expected: None, actual: Some(_), .. }
        ));
        assert_eq!(repo.operations().await.len(), 1);
        let stored: serde_json::Value = repo.load(&AggregateId::from("P1")).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Acme");
    }

    #[tokio::test]
    async fn concurrent_update_is_not_lost() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.commit().await.unwrap();

        let update = |name: &str| {
            EntityRecord::from_state(
                AggregateId::from("P1"),
                "Partner",
                Version::new(2),
                &serde_json::json!({ "name": name }),
            )
            .unwrap()
            .with_expected_version(Version::new(1))
        };
        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        first.update(update("Acme Corp")).await.unwrap();
        second.update(update("Acme Inc")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();

        assert!(err.is_transient());
        let stored: serde_json::Value = repo.load(&AggregateId::from("P1")).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Acme Corp");
    }

    #[tokio::test]
    async fn stale_expected_version_is_rejected_when_staged() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.add(record("P1", "Acme")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let stale = record("P1", "Acme").with_expected_version(Version::new(0));
        let err = tx.delete(stale).await.unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::ConcurrencyConflict {
                expected: Some(_),
                actual: Some(_),
                ..
            }
        ));
        assert_eq!(repo.len().await, 1);
    }
}
