//! Domain events released by a committed unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId, MessageId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::command::MessageMetadata;
use crate::error::PublishError;

/// A domain event together with its routing and provenance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier for this event.
    pub event_id: MessageId,

    /// The type of the event (e.g., "ContractCreated").
    pub event_type: String,

    /// The aggregate that recorded the event.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Contract").
    pub aggregate_type: String,

    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,

    /// Correlation id of the command that produced the event.
    pub correlation_id: CorrelationId,

    /// Id of the command that produced the event.
    pub causation_id: Option<MessageId>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Builds a record for an event recorded by `aggregate` while handling a
    /// message described by `metadata`.
    pub fn from_event<A: Aggregate>(
        aggregate: &A,
        event: &A::Event,
        metadata: &MessageMetadata,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: MessageId::new(),
            event_type: event.event_type().to_string(),
            aggregate_id: aggregate.id().clone(),
            aggregate_type: A::aggregate_type().to_string(),
            occurred_at: Utc::now(),
            correlation_id: metadata.correlation_id.clone(),
            causation_id: Some(metadata.id.clone()),
            payload: serde_json::to_value(event)?,
        })
    }
}

/// Port through which committed events leave the unit of work.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a batch of events in order.
    async fn publish(&self, events: &[EventRecord]) -> Result<(), PublishError>;
}

/// Publisher that keeps every event in memory.
///
/// Used by tests and by services that do not forward their domain events.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    inner: Arc<Mutex<PublisherState>>,
}

#[derive(Default)]
struct PublisherState {
    published: Vec<EventRecord>,
    fail: bool,
}

impl InMemoryEventPublisher {
    /// Creates an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event published so far.
    pub async fn published(&self) -> Vec<EventRecord> {
        self.inner.lock().await.published.clone()
    }

    /// Returns the types of every event published so far.
    pub async fn event_types(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .published
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Makes subsequent publishes fail while set.
    pub async fn set_failing(&self, fail: bool) {
        self.inner.lock().await.fail = fail;
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, events: &[EventRecord]) -> Result<(), PublishError> {
        let mut state = self.inner.lock().await;
        if state.fail {
            return Err(PublishError("publisher unavailable".to_string()));
        }
        state.published.extend_from_slice(events);
        Ok(())
    }
}
