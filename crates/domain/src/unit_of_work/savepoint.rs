use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransactionId;

/// A named marker inside a unit of work.
///
/// Captures how many operations and tracked aggregates existed when it was
/// created. Rolling back to it truncates both queues to those counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savepoint {
    pub id: Uuid,
    pub name: String,
    pub transaction_id: TransactionId,
    pub operation_count: usize,
    pub tracked_count: usize,
}

impl Savepoint {
    pub(crate) fn new(
        name: impl Into<String>,
        transaction_id: TransactionId,
        operation_count: usize,
        tracked_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            transaction_id,
            operation_count,
            tracked_count,
        }
    }
}
