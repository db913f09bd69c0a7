//! Committed events waiting for publication.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::PublishError;
use crate::event::{EventPublisher, EventRecord};

/// Events whose writes are committed but that the publisher has not accepted.
///
/// Shared by every unit of work of a factory. Each release publishes the
/// backlog ahead of the new events, so publication order matches commit
/// order. Events leave the outbox only once the publisher accepted them; a
/// batch that failed halfway is published again as a whole.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    pending: Arc<Mutex<Vec<EventRecord>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events waiting for publication.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Returns a copy of the waiting events, oldest first.
    pub async fn events(&self) -> Vec<EventRecord> {
        self.pending.lock().await.clone()
    }

    /// Appends `events` and publishes everything waiting.
    pub(crate) async fn release(
        &self,
        publisher: &dyn EventPublisher,
        events: Vec<EventRecord>,
    ) -> Result<(), PublishError> {
        let mut pending = self.pending.lock().await;
        pending.extend(events);
        publish_all(publisher, &mut pending).await
    }

    /// Publishes every waiting event and returns how many were released.
    pub async fn flush(&self, publisher: &dyn EventPublisher) -> Result<usize, PublishError> {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        publish_all(publisher, &mut pending).await?;
        Ok(count)
    }
}

async fn publish_all(
    publisher: &dyn EventPublisher,
    pending: &mut Vec<EventRecord>,
) -> Result<(), PublishError> {
    if pending.is_empty() {
        return Ok(());
    }
    if let Err(e) = publisher.publish(pending.as_slice()).await {
        tracing::warn!(waiting = pending.len(), error = %e, "Events kept for republication");
        metrics::counter!("uow_publish_failures_total").increment(1);
        return Err(e);
    }
    pending.clear();
    Ok(())
}
