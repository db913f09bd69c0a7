//! Wire format of saga events.

use chrono::Utc;
use common::{CorrelationId, MessageId, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Payload of a saga event: subject id, correlation data and step fields.
pub type EventData = Map<String, Value>;

/// Field holding the message id inside `event_data`.
pub const EVENT_ID: &str = "event_id";
/// Field holding the saga-wide correlation id inside `event_data`.
pub const CORRELATION_ID: &str = "correlation_id";
/// Field holding the id of the triggering message inside `event_data`.
pub const CAUSATION_ID: &str = "causation_id";

/// A message as it travels on the shared topic.
///
/// ```json
/// {"event_type": "ContractCreated",
///  "event_data": {"partner_id": "P1", "correlation_id": "C1", "causation_id": "..."},
///  "timestamp": 1718000000.25,
///  "source": "contract-service"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaEvent {
    pub event_type: String,
    pub event_data: EventData,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Service id of the publisher.
    pub source: String,
}

impl SagaEvent {
    /// Wraps `event_data` for publication by `source`, stamped now.
    pub fn new(event_type: impl Into<String>, event_data: EventData, source: &ServiceId) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            source: source.as_str().to_string(),
        }
    }

    /// Serializes the envelope to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Returns true if the event was published by `service`.
    pub fn is_from(&self, service: &ServiceId) -> bool {
        self.source == service.as_str()
    }

    /// Returns a string field of `event_data`.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.event_data.get(name).and_then(Value::as_str)
    }

    /// Returns the message id, if the publisher assigned one.
    pub fn event_id(&self) -> Option<MessageId> {
        self.str_field(EVENT_ID).map(MessageId::from)
    }

    /// Returns the correlation id carried by the event.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.str_field(CORRELATION_ID).map(CorrelationId::from)
    }

    /// Returns the causation id carried by the event.
    pub fn causation_id(&self) -> Option<MessageId> {
        self.str_field(CAUSATION_ID).map(MessageId::from)
    }
}
