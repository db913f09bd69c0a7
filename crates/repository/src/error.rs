use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with a repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// An entity with the same id already exists.
    #[error("Entity already exists: {aggregate_type} with id {aggregate_id}")]
    AlreadyExists {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    /// The entity to update or delete does not exist.
    #[error("Entity not found: {aggregate_type} with id {aggregate_id}")]
    NotFound {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    /// Another transaction changed the entity since this one read it.
    ///
    /// `None` stands for an entity that does not exist.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected:?}, found {actual:?}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Option<Version>,
        actual: Option<Version>,
    },

    /// The backing store is temporarily unavailable.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// The transaction was already committed or rolled back.
    #[error("Repository transaction is closed")]
    TransactionClosed,

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Returns true for failures that may succeed when retried.
    ///
    /// A concurrency conflict succeeds once the command reloads the entity.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::ConcurrencyConflict { .. }
        )
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_conflicts_are_transient() {
        assert!(RepositoryError::Unavailable("down".into()).is_transient());
        assert!(
            RepositoryError::ConcurrencyConflict {
                aggregate_id: AggregateId::from("campaign-launch"),
                expected: Some(Version::new(1)),
                actual: Some(Version::new(2)),
            }
            .is_transient()
        );
        assert!(!RepositoryError::TransactionClosed.is_transient());
        assert!(
            !RepositoryError::NotFound {
                aggregate_type: "Contract".into(),
                aggregate_id: AggregateId::from("c-1"),
            }
            .is_transient()
        );
    }
}
