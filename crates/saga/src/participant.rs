//! Runs a saga step in response to events from other services.

use std::sync::Arc;

use async_trait::async_trait;
use dispatcher::{EventDispatcher, EventHandler, HandlerError, SagaEvent};
use serde_json::Value;

use crate::availability::{InMemoryAvailability, ServiceAvailability};
use crate::error::{Result, StepError};
use crate::ledger::StepLedger;
use crate::state::StepState;
use crate::step::{ERROR, SagaStep, StepRequest};

/// Binds a [`SagaStep`] to the event dispatcher of its service.
///
/// A step request runs the step once per correlation id and answers with
/// the step's "completed" or "failed" event. A compensation request always
/// yields exactly one "compensated" event, carrying an `error` field when
/// the undo failed.
pub struct SagaParticipant {
    step: Arc<dyn SagaStep>,
    dispatcher: EventDispatcher,
    ledger: StepLedger,
    availability: Arc<dyn ServiceAvailability>,
}

impl SagaParticipant {
    /// Creates a participant that is always available.
    pub fn new(step: Arc<dyn SagaStep>, dispatcher: EventDispatcher) -> Self {
        Self {
            step,
            dispatcher,
            ledger: StepLedger::new(),
            availability: Arc::new(InMemoryAvailability::new()),
        }
    }

    pub fn with_availability(mut self, availability: Arc<dyn ServiceAvailability>) -> Self {
        self.availability = availability;
        self
    }

    /// Replaces the ledger, for instance to change its retention window.
    pub fn with_ledger(mut self, ledger: StepLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Subscribes the participant to its request and compensation events.
    pub async fn register(self: Arc<Self>) {
        let events = *self.step.events();
        let dispatcher = self.dispatcher.clone();
        dispatcher
            .subscribe(events.requested, Arc::new(RequestHandler(self.clone())))
            .await;
        dispatcher
            .subscribe(events.compensate, Arc::new(CompensationHandler(self)))
            .await;
    }

    /// Handles a step request.
    #[tracing::instrument(skip(self, event), fields(step = self.step.name()))]
    pub async fn on_requested(&self, event: &SagaEvent) -> Result<()> {
        let request = StepRequest::from_event(event)?;
        let step = self.step.name();

        if !self.ledger.begin(&request.correlation_id, step).await {
            metrics::counter!("saga_duplicate_requests_total", "step" => step).increment(1);
            tracing::debug!(correlation_id = %request.correlation_id, "Duplicate step request ignored");
            return Ok(());
        }

        let outcome = if self.availability.is_available() {
            self.step.execute(&request).await
        } else {
            Err(StepError::Unavailable(
                self.dispatcher.service_id().to_string(),
            ))
        };

        let events = self.step.events();
        let mut data = request.reply(step, self.step.subject_field());
        let (event_type, state) = match outcome {
            Ok(fields) => {
                data.extend(fields);
                tracing::info!(correlation_id = %request.correlation_id, "Step completed");
                (events.completed, StepState::Completed)
            }
            Err(e) => {
                tracing::warn!(correlation_id = %request.correlation_id, error = %e, "Step failed");
                data.insert(ERROR.to_string(), Value::String(e.to_string()));
                (events.failed, StepState::Failed)
            }
        };

        self.ledger
            .finish(&request.correlation_id, step, state)
            .await;
        metrics::counter!("saga_steps_total", "step" => step, "outcome" => state.as_str())
            .increment(1);

        self.dispatcher.publish(event_type, data).await?;
        Ok(())
    }

    /// Handles a compensation request.
    #[tracing::instrument(skip(self, event), fields(step = self.step.name()))]
    pub async fn on_compensate(&self, event: &SagaEvent) -> Result<()> {
        let request = StepRequest::from_event(event)?;
        let step = self.step.name();

        if !self
            .ledger
            .begin_compensation(&request.correlation_id, step, request.message_id.as_ref())
            .await
        {
            tracing::debug!(
                correlation_id = %request.correlation_id,
                request_id = %request.request_id,
                "Duplicate compensation request ignored"
            );
            return Ok(());
        }

        let mut data = request.reply(step, self.step.subject_field());
        let outcome = match self.step.compensate(&request).await {
            Ok(()) => {
                tracing::info!(correlation_id = %request.correlation_id, "Step compensated");
                "compensated"
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "Compensation failed, confirming anyway"
                );
                data.insert(ERROR.to_string(), Value::String(e.to_string()));
                "error"
            }
        };

        self.ledger
            .finish(&request.correlation_id, step, StepState::Compensated)
            .await;
        metrics::counter!("saga_compensations_total", "step" => step, "outcome" => outcome)
            .increment(1);

        self.dispatcher
            .publish(self.step.events().compensated, data)
            .await?;
        Ok(())
    }
}

struct RequestHandler(Arc<SagaParticipant>);

#[async_trait]
impl EventHandler for RequestHandler {
    async fn handle(&self, event: &SagaEvent) -> std::result::Result<(), HandlerError> {
        Ok(self.0.on_requested(event).await?)
    }
}

struct CompensationHandler(Arc<SagaParticipant>);

#[async_trait]
impl EventHandler for CompensationHandler {
    async fn handle(&self, event: &SagaEvent) -> std::result::Result<(), HandlerError> {
        Ok(self.0.on_compensate(event).await?)
    }
}
