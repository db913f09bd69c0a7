//! Partner service: registers partners and follows their onboarding.
//!
//! The partner service starts each saga and reacts to the outcome events of
//! every step. It never tells a participant to run a step. It only asks for
//! compensation once a step has failed.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, CorrelationId};
use dispatcher::{
    CAUSATION_ID, CORRELATION_ID, DispatcherPublisher, EventData, EventDispatcher, EventHandler,
    HandlerError, SagaEvent,
};
use domain::{
    Aggregate, Command, CommandBus, CommandError, CommandHandler, CommandPayload, DomainEvent,
    MessageMetadata, PendingEvents, Query, QueryBus, QueryHandler, QueryPayload, SYSTEM_USER,
    UnitOfWork, ValidationError,
};
use repository::{Repository, RepositoryExt, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::events::{
    PARTNER_ONBOARDING_COMPLETED, PARTNER_ONBOARDING_FAILED, PARTNER_ONBOARDING_INITIATED,
    RECRUITMENT_REGISTRATION, STEPS, step_compensated_by, step_completed_by, step_failed_by,
    step_named,
};
use super::{caused_by, single_repository_factory};
use crate::error::{Result, SagaError, StepError};
use crate::state::SagaState;
use crate::step::{ERROR, PARTNER_ID, SAGA_ID, STEP, StepRequest};

pub const PARTNERS: &str = "partners";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartnerStatus {
    #[default]
    Pending,
    Active,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartnerEvent {
    Registered {
        name: String,
        saga_id: String,
    },
    StepRecorded {
        step: String,
    },
    CompensationStarted {
        failed_step: String,
        reason: String,
        steps: Vec<String>,
    },
    CompensationConfirmed {
        step: String,
    },
    Activated,
    Rejected,
}

impl DomainEvent for PartnerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartnerEvent::Registered { .. } => "PartnerRegistered",
            PartnerEvent::StepRecorded { .. } => "PartnerStepRecorded",
            PartnerEvent::CompensationStarted { .. } => "PartnerCompensationStarted",
            PartnerEvent::CompensationConfirmed { .. } => "PartnerCompensationConfirmed",
            PartnerEvent::Activated => "PartnerActivated",
            PartnerEvent::Rejected => "PartnerRejected",
        }
    }
}

/// A partner and the progress of its onboarding saga.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Partner {
    id: AggregateId,
    name: String,
    status: PartnerStatus,
    onboarding: SagaState,
    saga_id: String,
    completed_steps: Vec<String>,
    pending_compensations: Vec<String>,
    failed_step: Option<String>,
    failure_reason: Option<String>,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents<PartnerEvent>,
}

impl Partner {
    pub fn status(&self) -> PartnerStatus {
        self.status
    }

    pub fn onboarding(&self) -> SagaState {
        self.onboarding
    }

    fn summary(&self) -> Value {
        json!({
            "partner_id": self.id.as_str(),
            "name": self.name,
            "saga_id": self.saga_id,
            "status": self.status,
            "onboarding": self.onboarding,
            "completed_steps": self.completed_steps,
            "pending_compensations": self.pending_compensations,
            "failed_step": self.failed_step,
            "failure_reason": self.failure_reason,
        })
    }
}

impl Aggregate for Partner {
    type Event = PartnerEvent;

    fn aggregate_type() -> &'static str {
        "Partner"
    }

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &PendingEvents<PartnerEvent> {
        &self.pending
    }

    fn pending_events_mut(&mut self) -> &mut PendingEvents<PartnerEvent> {
        &mut self.pending
    }

    fn apply(&mut self, event: &PartnerEvent) {
        match event {
            PartnerEvent::Registered { name, saga_id } => {
                self.name = name.clone();
                self.saga_id = saga_id.clone();
                self.status = PartnerStatus::Pending;
                self.onboarding = SagaState::Running;
            }
            PartnerEvent::StepRecorded { step } => self.completed_steps.push(step.clone()),
            PartnerEvent::CompensationStarted {
                failed_step,
                reason,
                steps,
            } => {
                self.onboarding = SagaState::Compensating;
                self.failed_step = Some(failed_step.clone());
                self.failure_reason = Some(reason.clone());
                self.pending_compensations = steps.clone();
            }
            PartnerEvent::CompensationConfirmed { step } => {
                self.pending_compensations.retain(|s| s != step)
            }
            PartnerEvent::Activated => {
                self.status = PartnerStatus::Active;
                self.onboarding = SagaState::Completed;
            }
            PartnerEvent::Rejected => {
                self.status = PartnerStatus::Rejected;
                self.onboarding = SagaState::Failed;
            }
        }
    }
}

/// Read model returned by [`PartnerOnboarding::status`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OnboardingStatus {
    pub partner_id: String,
    pub name: String,
    pub saga_id: String,
    pub status: PartnerStatus,
    pub onboarding: SagaState,
    pub completed_steps: Vec<String>,
    pub pending_compensations: Vec<String>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PartnerCommand {
    Register {
        partner_id: String,
        name: String,
        saga_id: String,
    },
    RecordStep {
        partner_id: String,
        step: String,
    },
    StartCompensation {
        partner_id: String,
        failed_step: String,
        reason: String,
    },
    ConfirmCompensation {
        partner_id: String,
        step: String,
    },
    Activate {
        partner_id: String,
    },
}

impl PartnerCommand {
    fn partner_id(&self) -> &str {
        match self {
            PartnerCommand::Register { partner_id, .. }
            | PartnerCommand::RecordStep { partner_id, .. }
            | PartnerCommand::StartCompensation { partner_id, .. }
            | PartnerCommand::ConfirmCompensation { partner_id, .. }
            | PartnerCommand::Activate { partner_id } => partner_id,
        }
    }
}

impl CommandPayload for PartnerCommand {
    fn command_type(&self) -> &'static str {
        match self {
            PartnerCommand::Register { .. } => "RegisterPartner",
            PartnerCommand::RecordStep { .. } => "RecordOnboardingStep",
            PartnerCommand::StartCompensation { .. } => "StartOnboardingCompensation",
            PartnerCommand::ConfirmCompensation { .. } => "ConfirmOnboardingCompensation",
            PartnerCommand::Activate { .. } => "ActivatePartner",
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.partner_id().trim().is_empty() {
            return Err(ValidationError::new(PARTNER_ID, "must not be empty"));
        }
        match self {
            PartnerCommand::Register { name, .. } if name.trim().is_empty() => {
                Err(ValidationError::new("name", "must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Applies every partner command. Commands that arrive too late for the
/// saga's current state succeed without effect.
struct PartnerHandler {
    partners: Arc<dyn Repository>,
}

impl PartnerHandler {
    async fn load(&self, partner_id: &str) -> std::result::Result<Partner, CommandError> {
        self.partners
            .load::<Partner>(&AggregateId::from(partner_id))
            .await?
            .ok_or_else(|| CommandError::domain(format!("partner {partner_id} is not registered")))
    }
}

#[async_trait]
impl CommandHandler<PartnerCommand> for PartnerHandler {
    async fn handle(
        &self,
        command: &Command<PartnerCommand>,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<Value, CommandError> {
        let mut partner = match &command.payload {
            PartnerCommand::Register {
                partner_id,
                name,
                saga_id,
            } => {
                let id = AggregateId::from(partner_id.as_str());
                if self.partners.exists(&id).await? {
                    return Err(CommandError::domain(format!(
                        "partner {partner_id} is already registered"
                    )));
                }
                let mut partner = Partner {
                    id,
                    ..Default::default()
                };
                partner.record(PartnerEvent::Registered {
                    name: name.clone(),
                    saga_id: saga_id.clone(),
                });
                uow.register_new(&mut partner, PARTNERS)?;
                return Ok(partner.summary());
            }
            payload => self.load(payload.partner_id()).await?,
        };

        match &command.payload {
            PartnerCommand::Register { .. } => {}
            PartnerCommand::RecordStep { step, .. } => {
                if partner.onboarding.can_advance() && !partner.completed_steps.contains(step) {
                    partner.record(PartnerEvent::StepRecorded { step: step.clone() });
                }
            }
            PartnerCommand::StartCompensation {
                failed_step,
                reason,
                ..
            } => {
                if partner.onboarding.can_compensate() {
                    // Undo in reverse order of completion.
                    let steps = partner.completed_steps.iter().rev().cloned().collect();
                    partner.record(PartnerEvent::CompensationStarted {
                        failed_step: failed_step.clone(),
                        reason: reason.clone(),
                        steps,
                    });
                    if partner.pending_compensations.is_empty() {
                        partner.record(PartnerEvent::Rejected);
                    }
                }
            }
            PartnerCommand::ConfirmCompensation { step, .. } => {
                if partner.onboarding == SagaState::Compensating
                    && partner.pending_compensations.contains(step)
                {
                    partner.record(PartnerEvent::CompensationConfirmed { step: step.clone() });
                    if partner.pending_compensations.is_empty() {
                        partner.record(PartnerEvent::Rejected);
                    }
                }
            }
            PartnerCommand::Activate { .. } => {
                if partner.onboarding.can_advance() {
                    partner.record(PartnerEvent::Activated);
                }
            }
        }

        let changes = partner.pending_events().len();
        let summary = partner.summary();
        if changes > 0 {
            uow.register_updated(&mut partner, PARTNERS)?;
        }
        Ok(json!({ "partner": summary, "changed": changes > 0 }))
    }
}

#[derive(Debug, Clone)]
pub enum PartnerQuery {
    Onboarding { partner_id: String },
}

impl QueryPayload for PartnerQuery {
    fn query_type(&self) -> &'static str {
        "GetPartnerOnboarding"
    }
}

struct PartnerQueryHandler {
    partners: Arc<dyn Repository>,
}

#[async_trait]
impl QueryHandler<PartnerQuery> for PartnerQueryHandler {
    async fn handle(&self, query: &Query<PartnerQuery>) -> std::result::Result<Value, CommandError> {
        let PartnerQuery::Onboarding { partner_id } = &query.payload;
        let partner = self
            .partners
            .load::<Partner>(&AggregateId::from(partner_id.as_str()))
            .await?;
        Ok(partner.map(|p| p.summary()).unwrap_or(Value::Null))
    }
}

/// Identifiers of a freshly started onboarding saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingStarted {
    pub saga_id: String,
    pub correlation_id: CorrelationId,
}

/// Starts onboarding sagas and reacts to their step outcomes.
pub struct PartnerOnboarding {
    commands: CommandBus<PartnerCommand>,
    queries: QueryBus<PartnerQuery>,
    dispatcher: EventDispatcher,
}

impl PartnerOnboarding {
    /// Creates the partner service. Domain events of committed partner
    /// changes are released through `dispatcher`.
    pub fn new(partners: Arc<dyn Repository>, dispatcher: EventDispatcher) -> Result<Self> {
        let publisher = Arc::new(DispatcherPublisher::new(dispatcher.clone()));
        let factory = single_repository_factory(PARTNERS, partners.clone(), publisher);

        let mut commands = CommandBus::new(factory);
        let handler = Arc::new(PartnerHandler {
            partners: partners.clone(),
        });
        for command_type in [
            "RegisterPartner",
            "RecordOnboardingStep",
            "StartOnboardingCompensation",
            "ConfirmOnboardingCompensation",
            "ActivatePartner",
        ] {
            commands.register_handler(command_type, handler.clone())?;
        }

        let mut queries = QueryBus::new();
        queries.register_handler("GetPartnerOnboarding", Arc::new(PartnerQueryHandler { partners }))?;

        Ok(Self {
            commands,
            queries,
            dispatcher,
        })
    }

    /// Subscribes to the completion, failure and compensation events of
    /// every step.
    pub async fn register(self: Arc<Self>) {
        for step in &STEPS {
            for event_type in [step.completed, step.failed, step.compensated] {
                self.dispatcher
                    .subscribe(event_type, Arc::new(OutcomeHandler(self.clone())))
                    .await;
            }
        }
    }

    /// Registers the partner and publishes `PartnerOnboardingInitiated`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, partner_id: &str, name: &str) -> Result<OnboardingStarted> {
        let saga_id = Uuid::new_v4().to_string();
        let metadata = MessageMetadata::new().with_user(SYSTEM_USER);
        let correlation_id = metadata.correlation_id.clone();

        let command = Command::with_metadata(
            PartnerCommand::Register {
                partner_id: partner_id.to_string(),
                name: name.to_string(),
                saga_id: saga_id.clone(),
            },
            metadata,
        );
        StepError::check(self.commands.dispatch(&command).await)?;

        let mut data = EventData::new();
        data.insert(PARTNER_ID.to_string(), json!(partner_id));
        data.insert("name".to_string(), json!(name));
        data.insert(SAGA_ID.to_string(), json!(saga_id));
        data.insert(CORRELATION_ID.to_string(), json!(correlation_id.as_str()));
        data.insert(CAUSATION_ID.to_string(), json!(command.id().as_str()));
        self.dispatcher
            .publish(PARTNER_ONBOARDING_INITIATED, data)
            .await?;

        metrics::counter!("onboarding_sagas_started_total").increment(1);
        tracing::info!(%saga_id, %correlation_id, "Partner onboarding started");
        Ok(OnboardingStarted {
            saga_id,
            correlation_id,
        })
    }

    /// Returns the onboarding progress of a partner.
    pub async fn status(&self, partner_id: &str) -> Result<Option<OnboardingStatus>> {
        let query = Query::new(PartnerQuery::Onboarding {
            partner_id: partner_id.to_string(),
        });
        let result = self.queries.dispatch(&query).await;
        if !result.success {
            let message = result.error.map(|e| e.message).unwrap_or_default();
            return Err(SagaError::Query(message));
        }
        match result.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Reacts to a step outcome.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn on_outcome(&self, event: &SagaEvent) -> Result<()> {
        let request = StepRequest::from_event(event)?;
        let partner_id = request
            .str_field(PARTNER_ID)
            .ok_or_else(|| SagaError::MissingField {
                event_type: event.event_type.clone(),
                field: PARTNER_ID,
            })?
            .to_string();
        let event_type = event.event_type.as_str();

        if let Some(step) = step_completed_by(event_type) {
            self.execute(
                &request,
                PartnerCommand::RecordStep {
                    partner_id: partner_id.clone(),
                    step: step.name.to_string(),
                },
            )
            .await?;

            if step.name == RECRUITMENT_REGISTRATION.name {
                let outcome = self
                    .execute(&request, PartnerCommand::Activate { partner_id: partner_id.clone() })
                    .await?;
                if outcome.changed {
                    metrics::counter!("onboarding_sagas_completed_total").increment(1);
                    let data = self.saga_data(&request, &partner_id, &outcome);
                    self.dispatcher
                        .publish(PARTNER_ONBOARDING_COMPLETED, data)
                        .await?;
                }
            }
        } else if let Some(step) = step_failed_by(event_type) {
            let reason = request.str_field(ERROR).unwrap_or("step failed").to_string();
            let outcome = self
                .execute(
                    &request,
                    PartnerCommand::StartCompensation {
                        partner_id: partner_id.clone(),
                        failed_step: step.name.to_string(),
                        reason: reason.clone(),
                    },
                )
                .await?;
            if !outcome.changed {
                return Ok(());
            }

            tracing::warn!(step = step.name, %reason, "Onboarding step failed, compensating");
            for name in &outcome.partner.pending_compensations {
                let Some(completed) = step_named(name) else {
                    continue;
                };
                let mut data = self.saga_data(&request, &partner_id, &outcome);
                data.insert(STEP.to_string(), json!(completed.name));
                data.insert("reason".to_string(), json!(reason));
                self.dispatcher.publish(completed.compensate, data).await?;
            }
            self.finish_if_rejected(&request, &partner_id, &outcome).await?;
        } else if let Some(step) = step_compensated_by(event_type) {
            if let Some(error) = request.str_field(ERROR) {
                tracing::warn!(step = step.name, %error, "Compensation reported an error");
            }
            let outcome = self
                .execute(
                    &request,
                    PartnerCommand::ConfirmCompensation {
                        partner_id: partner_id.clone(),
                        step: step.name.to_string(),
                    },
                )
                .await?;
            self.finish_if_rejected(&request, &partner_id, &outcome)
                .await?;
        }

        Ok(())
    }

    async fn finish_if_rejected(
        &self,
        request: &StepRequest,
        partner_id: &str,
        outcome: &CommandOutcome,
    ) -> Result<()> {
        if !outcome.changed || outcome.partner.onboarding != SagaState::Failed {
            return Ok(());
        }
        metrics::counter!("onboarding_sagas_failed_total").increment(1);
        let mut data = self.saga_data(request, partner_id, outcome);
        data.insert(
            "failed_step".to_string(),
            json!(outcome.partner.failed_step),
        );
        data.insert(
            "reason".to_string(),
            json!(outcome.partner.failure_reason),
        );
        self.dispatcher
            .publish(PARTNER_ONBOARDING_FAILED, data)
            .await?;
        Ok(())
    }

    async fn execute(&self, request: &StepRequest, payload: PartnerCommand) -> Result<CommandOutcome> {
        let command = Command::with_metadata(payload, caused_by(request));
        let value = StepError::check(self.commands.dispatch(&command).await)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Payload of a partner-level saga event answering `request`.
    fn saga_data(&self, request: &StepRequest, partner_id: &str, outcome: &CommandOutcome) -> EventData {
        let mut data = EventData::new();
        data.insert(PARTNER_ID.to_string(), json!(partner_id));
        data.insert(SAGA_ID.to_string(), json!(outcome.partner.saga_id));
        data.insert(
            CORRELATION_ID.to_string(),
            json!(request.correlation_id.as_str()),
        );
        data.insert(
            CAUSATION_ID.to_string(),
            json!(request.request_id.as_str()),
        );
        data
    }
}

#[derive(Debug, Deserialize)]
struct CommandOutcome {
    partner: OnboardingStatus,
    changed: bool,
}

struct OutcomeHandler(Arc<PartnerOnboarding>);

#[async_trait]
impl EventHandler for OutcomeHandler {
    async fn handle(&self, event: &SagaEvent) -> std::result::Result<(), HandlerError> {
        Ok(self.0.on_outcome(event).await?)
    }
}
