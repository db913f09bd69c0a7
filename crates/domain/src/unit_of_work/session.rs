//! Suspending a unit of work across request/response cycles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{BatchOperation, Savepoint, TrackedAggregate, TransactionId};
use crate::command::MessageMetadata;

/// Everything needed to rebuild a draft unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedTransaction {
    pub transaction_id: TransactionId,
    pub metadata: MessageMetadata,
    pub operations: Vec<BatchOperation>,
    pub tracked: Vec<TrackedAggregate>,
    pub savepoints: Vec<Savepoint>,
}

/// Caller-owned storage for suspended transactions.
///
/// Entries are serialized JSON documents keyed by transaction id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a serialized transaction, replacing any previous entry.
    async fn put(&self, transaction_id: TransactionId, data: String);

    /// Removes and returns the entry for a transaction.
    async fn take(&self, transaction_id: &TransactionId) -> Option<String>;
}

/// In-memory session store.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    entries: Arc<RwLock<HashMap<TransactionId, String>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of suspended transactions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is suspended.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, transaction_id: TransactionId, data: String) {
        self.entries.write().await.insert(transaction_id, data);
    }

    async fn take(&self, transaction_id: &TransactionId) -> Option<String> {
        self.entries.write().await.remove(transaction_id)
    }
}
