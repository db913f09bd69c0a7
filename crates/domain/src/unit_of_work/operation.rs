use common::AggregateId;
use repository::{EntityRecord, OperationKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventRecord;

/// A write queued by a unit of work, executed only at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub record: EntityRecord,
    pub repository_name: String,
}

impl BatchOperation {
    pub(crate) fn new(
        kind: OperationKind,
        record: EntityRecord,
        repository_name: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            kind,
            record,
            repository_name: repository_name.into(),
        }
    }

    /// Returns the id of the aggregate this operation writes.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.record.aggregate_id
    }
}

/// Events taken from an aggregate at registration, waiting for the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAggregate {
    pub aggregate_id: AggregateId,
    pub events: Vec<EventRecord>,
}
