//! Contract service: creates a partner's contract and cancels it on
//! compensation.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use dispatcher::EventData;
use domain::{
    Aggregate, Command, CommandBus, CommandError, CommandHandler, CommandPayload, DomainEvent,
    EventPublisher, PendingEvents, UnitOfWork, ValidationError,
};
use repository::{Repository, RepositoryExt, Version};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::events::CONTRACT_CREATION;
use super::{caused_by, into_fields, single_repository_factory};
use crate::error::{Result, StepError};
use crate::step::{PARTNER_ID, SagaStep, StepEvents, StepRequest};

/// Repository name contracts are stored under.
pub const CONTRACTS: &str = "contracts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContractStatus {
    #[default]
    Draft,
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContractEvent {
    Opened { partner_id: String },
    Voided { reason: String },
}

impl DomainEvent for ContractEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::Opened { .. } => "ContractOpened",
            ContractEvent::Voided { .. } => "ContractVoided",
        }
    }
}

/// A partner's contract. One per partner.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Contract {
    id: AggregateId,
    partner_id: String,
    status: ContractStatus,
    cancellation_reason: Option<String>,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents<ContractEvent>,
}

impl Contract {
    /// Id of the contract belonging to a partner.
    pub fn id_for(partner_id: &str) -> AggregateId {
        AggregateId::from(format!("contract-{partner_id}"))
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn status(&self) -> ContractStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }
}

impl Aggregate for Contract {
    type Event = ContractEvent;

    fn aggregate_type() -> &'static str {
        "Contract"
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

    fn pending_events(&self) -> &PendingEvents<ContractEvent> {
        &self.pending
    }

    fn pending_events_mut(&mut self) -> &mut PendingEvents<ContractEvent> {
        &mut self.pending
    }

    fn apply(&mut self, event: &ContractEvent) {
        match event {
            ContractEvent::Opened { partner_id } => {
                self.partner_id = partner_id.clone();
                self.status = ContractStatus::Active;
            }
            ContractEvent::Voided { reason } => {
                self.status = ContractStatus::Cancelled;
                self.cancellation_reason = Some(reason.clone());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ContractCommand {
    Create { partner_id: String },
    Cancel { partner_id: String, reason: String },
}

impl CommandPayload for ContractCommand {
    fn command_type(&self) -> &'static str {
        match self {
            ContractCommand::Create { .. } => "CreateContract",
            ContractCommand::Cancel { .. } => "CancelContract",
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let (ContractCommand::Create { partner_id } | ContractCommand::Cancel { partner_id, .. }) =
            self;
        if partner_id.trim().is_empty() {
            return Err(ValidationError::new(PARTNER_ID, "must not be empty"));
        }
        Ok(())
    }
}

/// Handles both contract commands against the contract repository.
pub struct ContractHandler {
    contracts: Arc<dyn Repository>,
}

impl ContractHandler {
    pub fn new(contracts: Arc<dyn Repository>) -> Self {
        Self { contracts }
    }

    async fn create(
        &self,
        partner_id: &str,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        let id = Contract::id_for(partner_id);

        if let Some(existing) = self.contracts.load::<Contract>(&id).await? {
            return match existing.status {
                ContractStatus::Cancelled => Err(CommandError::domain(format!(
                    "contract {id} was cancelled"
                ))),
                _ => Ok(json!({ "contract_id": id.as_str() })),
            };
        }

        let mut contract = Contract {
            id: id.clone(),
            ..Default::default()
        };
        contract.record(ContractEvent::Opened {
            partner_id: partner_id.to_string(),
        });
        uow.register_new(&mut contract, CONTRACTS)?;

        Ok(json!({ "contract_id": id.as_str() }))
    }

    async fn cancel(
        &self,
        partner_id: &str,
        reason: &str,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        let id = Contract::id_for(partner_id);
        let Some(mut contract) = self.contracts.load::<Contract>(&id).await? else {
            return Err(CommandError::domain(format!(
                "partner {partner_id} has no contract"
            )));
        };

        // Cancelling twice is a no-op.
        if contract.status != ContractStatus::Cancelled {
            contract.record(ContractEvent::Voided {
                reason: reason.to_string(),
            });
            uow.register_updated(&mut contract, CONTRACTS)?;
        }

        Ok(json!({ "contract_id": id.as_str() }))
    }
}

#[async_trait]
impl CommandHandler<ContractCommand> for ContractHandler {
    async fn handle(
        &self,
        command: &Command<ContractCommand>,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        match &command.payload {
            ContractCommand::Create { partner_id } => self.create(partner_id, uow).await,
            ContractCommand::Cancel { partner_id, reason } => {
                self.cancel(partner_id, reason, uow).await
            }
        }
    }
}

/// The `contract_creation` step.
pub struct ContractStep {
    bus: CommandBus<ContractCommand>,
}

impl ContractStep {
    pub fn new(contracts: Arc<dyn Repository>, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let factory = single_repository_factory(CONTRACTS, contracts.clone(), publisher);
        let handler = Arc::new(ContractHandler::new(contracts));

        let mut bus = CommandBus::new(factory);
        bus.register_handler("CreateContract", handler.clone())?;
        bus.register_handler("CancelContract", handler)?;
        Ok(Self { bus })
    }

    pub fn bus(&self) -> &CommandBus<ContractCommand> {
        &self.bus
    }
}

#[async_trait]
impl SagaStep for ContractStep {
    fn events(&self) -> &StepEvents {
        &CONTRACT_CREATION
    }

    async fn execute(&self, request: &StepRequest) -> std::result::Result<EventData, StepError> {
        let command = Command::with_metadata(
            ContractCommand::Create {
                partner_id: request.require(PARTNER_ID)?.to_string(),
            },
            caused_by(request),
        );
        let value = StepError::check(self.bus.dispatch(&command).await)?;
        Ok(into_fields(value))
    }

    async fn compensate(&self, request: &StepRequest) -> std::result::Result<(), StepError> {
        let command = Command::with_metadata(
            ContractCommand::Cancel {
                partner_id: request.require(PARTNER_ID)?.to_string(),
                reason: request
                    .str_field("reason")
                    .unwrap_or("onboarding compensated")
                    .to_string(),
            },
            caused_by(request),
        );
        StepError::check(self.bus.dispatch(&command).await)?;
        Ok(())
    }
}
