//! Saga steps and the requests that drive them.

use async_trait::async_trait;
use common::{CorrelationId, MessageId};
use dispatcher::{CAUSATION_ID, CORRELATION_ID, EventData, SagaEvent};
use serde_json::Value;

use crate::error::{Result, SagaError, StepError};

/// Field echoing the saga instance id on outcome events.
pub const SAGA_ID: &str = "saga_id";
/// Field naming the step an outcome event belongs to.
pub const STEP: &str = "step";
/// Field describing why a step or compensation failed.
pub const ERROR: &str = "error";
/// Default subject field of onboarding events.
pub const PARTNER_ID: &str = "partner_id";

/// Event types exchanged for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEvents {
    /// Step name, echoed as `step` on outcome events.
    pub name: &'static str,
    /// Event that asks the step to run.
    pub requested: &'static str,
    pub completed: &'static str,
    pub failed: &'static str,
    /// Event that asks the step to undo its work.
    pub compensate: &'static str,
    pub compensated: &'static str,
}

/// A step or compensation request as seen by a participant.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Id used as causation of the outcome. The request's own message id,
    /// or a generated one when the request carried none.
    pub request_id: MessageId,
    /// Message id carried by the request, if any.
    pub message_id: Option<MessageId>,
    pub correlation_id: CorrelationId,
    pub saga_id: Option<String>,
    pub data: EventData,
}

impl StepRequest {
    /// Extracts a request from an inbound event.
    ///
    /// Fails when the event has no `correlation_id`. A request without
    /// `event_id` is accepted and answered under a generated id.
    pub fn from_event(event: &SagaEvent) -> Result<Self> {
        let correlation_id = event
            .correlation_id()
            .ok_or_else(|| SagaError::MissingField {
                event_type: event.event_type.clone(),
                field: CORRELATION_ID,
            })?;
        let message_id = event.event_id();
        let request_id = message_id.clone().unwrap_or_else(MessageId::new);

        Ok(Self {
            request_id,
            message_id,
            correlation_id,
            saga_id: event.str_field(SAGA_ID).map(str::to_string),
            data: event.event_data.clone(),
        })
    }

    /// Returns a string field of the request payload.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    /// Returns a string field, or a [`StepError::MissingField`].
    pub fn require(&self, name: &'static str) -> std::result::Result<&str, StepError> {
        self.str_field(name).ok_or(StepError::MissingField(name))
    }

    /// Starts the payload of an outcome event answering this request.
    ///
    /// Carries the correlation id, the request id as causation, the saga id
    /// when known, the step name and the subject field copied from the
    /// request.
    pub fn reply(&self, step: &str, subject_field: &str) -> EventData {
        let mut data = EventData::new();
        data.insert(
            CORRELATION_ID.to_string(),
            Value::String(self.correlation_id.to_string()),
        );
        data.insert(
            CAUSATION_ID.to_string(),
            Value::String(self.request_id.to_string()),
        );
        if let Some(saga_id) = &self.saga_id {
            data.insert(SAGA_ID.to_string(), Value::String(saga_id.clone()));
        }
        data.insert(STEP.to_string(), Value::String(step.to_string()));
        if let Some(subject) = self.data.get(subject_field) {
            data.insert(subject_field.to_string(), subject.clone());
        }
        data
    }
}

/// One local transaction of a choreographed saga, with its undo.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Event types this step listens to and answers with.
    fn events(&self) -> &StepEvents;

    fn name(&self) -> &'static str {
        self.events().name
    }

    /// Field identifying the saga subject, copied onto outcome events.
    fn subject_field(&self) -> &'static str {
        PARTNER_ID
    }

    /// Runs the local action. The returned fields are added to the
    /// "completed" event.
    async fn execute(&self, request: &StepRequest) -> std::result::Result<EventData, StepError>;

    /// Undoes the local action as far as possible.
    async fn compensate(&self, request: &StepRequest) -> std::result::Result<(), StepError>;
}
