//! Forwarding committed domain events onto the saga topic.

use async_trait::async_trait;
use domain::{EventPublisher, EventRecord, PublishError};
use serde_json::Value;

use crate::dispatcher::EventDispatcher;
use crate::envelope::{CAUSATION_ID, CORRELATION_ID, EVENT_ID, EventData};

/// [`EventPublisher`] that publishes each committed event through an
/// [`EventDispatcher`] under its own event type.
#[derive(Debug, Clone)]
pub struct DispatcherPublisher {
    dispatcher: EventDispatcher,
}

impl DispatcherPublisher {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Builds the `event_data` of a committed domain event.
pub fn event_data(record: &EventRecord) -> EventData {
    let mut data = EventData::new();
    data.insert(EVENT_ID.into(), Value::String(record.event_id.to_string()));
    data.insert(
        "aggregate_id".into(),
        Value::String(record.aggregate_id.to_string()),
    );
    data.insert(
        "aggregate_type".into(),
        Value::String(record.aggregate_type.clone()),
    );
    data.insert(
        CORRELATION_ID.into(),
        Value::String(record.correlation_id.to_string()),
    );
    data.insert(
        CAUSATION_ID.into(),
        record
            .causation_id
            .as_ref()
            .map_or(Value::Null, |id| Value::String(id.to_string())),
    );
    data.insert("payload".into(), record.payload.clone());
    data
}

#[async_trait]
impl EventPublisher for DispatcherPublisher {
    async fn publish(&self, events: &[EventRecord]) -> Result<(), PublishError> {
        for record in events {
            self.dispatcher
                .publish(&record.event_type, event_data(record))
                .await
                .map_err(|e| PublishError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{AggregateId, CorrelationId, MessageId};

    use super::*;

    #[test]
    fn event_data_carries_provenance() {
        let record = EventRecord {
            event_id: MessageId::from("E1"),
            event_type: "PartnerRegistered".into(),
            aggregate_id: AggregateId::from("P1"),
            aggregate_type: "Partner".into(),
            occurred_at: Utc::now(),
            correlation_id: CorrelationId::from("C1"),
            causation_id: Some(MessageId::from("CMD1")),
            payload: serde_json::json!({"name": "Acme"}),
        };

        let data = event_data(&record);
        assert_eq!(data[EVENT_ID], "E1");
        assert_eq!(data["aggregate_id"], "P1");
        assert_eq!(data[CORRELATION_ID], "C1");
        assert_eq!(data[CAUSATION_ID], "CMD1");
        assert_eq!(data["payload"]["name"], "Acme");
    }
}
