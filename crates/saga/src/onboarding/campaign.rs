//! Campaign service: enrolls partners into a capacity-limited campaign.

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

use super::events::CAMPAIGN_ENROLLMENT;
use super::{caused_by, into_fields, single_repository_factory};
use crate::error::{Result, StepError};
use crate::step::{PARTNER_ID, SagaStep, StepEvents, StepRequest};

pub const CAMPAIGNS: &str = "campaigns";

/// Campaign partners are enrolled into unless configured otherwise.
pub const DEFAULT_CAMPAIGN: &str = "campaign-launch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CampaignEvent {
    Opened { capacity: usize },
    PartnerEnrolled { partner_id: String },
    PartnerWithdrawn { partner_id: String },
}

impl DomainEvent for CampaignEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CampaignEvent::Opened { .. } => "CampaignOpened",
            CampaignEvent::PartnerEnrolled { .. } => "CampaignPartnerEnrolled",
            CampaignEvent::PartnerWithdrawn { .. } => "CampaignPartnerWithdrawn",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Campaign {
    id: AggregateId,
    capacity: usize,
    enrolled: Vec<String>,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents<CampaignEvent>,
}

impl Campaign {
    pub fn is_enrolled(&self, partner_id: &str) -> bool {
        self.enrolled.iter().any(|p| p == partner_id)
    }

    pub fn is_full(&self) -> bool {
        self.enrolled.len() >= self.capacity
    }

    pub fn enrolled(&self) -> &[String] {
        &self.enrolled
    }
}

impl Aggregate for Campaign {
    type Event = CampaignEvent;

    fn aggregate_type() -> &'static str {
        "Campaign"
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

    fn pending_events(&self) -> &PendingEvents<CampaignEvent> {
        &self.pending
    }

    fn pending_events_mut(&mut self) -> &mut PendingEvents<CampaignEvent> {
        &mut self.pending
    }

    fn apply(&mut self, event: &CampaignEvent) {
        match event {
            CampaignEvent::Opened { capacity } => self.capacity = *capacity,
            CampaignEvent::PartnerEnrolled { partner_id } => self.enrolled.push(partner_id.clone()),
            CampaignEvent::PartnerWithdrawn { partner_id } => {
                self.enrolled.retain(|p| p != partner_id)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum CampaignCommand {
    Enroll { partner_id: String },
    Withdraw { partner_id: String },
}

impl CommandPayload for CampaignCommand {
    fn command_type(&self) -> &'static str {
        match self {
            CampaignCommand::Enroll { .. } => "EnrollPartner",
            CampaignCommand::Withdraw { .. } => "WithdrawPartner",
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let (CampaignCommand::Enroll { partner_id } | CampaignCommand::Withdraw { partner_id }) =
            self;
        if partner_id.trim().is_empty() {
            return Err(ValidationError::new(PARTNER_ID, "must not be empty"));
        }
        Ok(())
    }
}

struct EnrollPartner {
    campaigns: Arc<dyn Repository>,
    campaign_id: AggregateId,
    capacity: usize,
}

#[async_trait]
impl CommandHandler<CampaignCommand> for EnrollPartner {
    async fn handle(
        &self,
        command: &Command<CampaignCommand>,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        let CampaignCommand::Enroll { partner_id } = &command.payload else {
            return Err(CommandError::NoHandler(command.command_type().to_string()));
        };
        let enrolled = json!({ "campaign_id": self.campaign_id.as_str() });

        match self.campaigns.load::<Campaign>(&self.campaign_id).await? {
            Some(campaign) if campaign.is_enrolled(partner_id) => Ok(enrolled),
            Some(campaign) if campaign.is_full() => Err(CommandError::domain(format!(
                "campaign {} is full",
                self.campaign_id
            ))),
            Some(mut campaign) => {
                campaign.record(CampaignEvent::PartnerEnrolled {
                    partner_id: partner_id.clone(),
                });
                uow.register_updated(&mut campaign, CAMPAIGNS)?;
                Ok(enrolled)
            }
            None if self.capacity == 0 => Err(CommandError::domain(format!(
                "campaign {} is full",
                self.campaign_id
            ))),
            None => {
                let mut campaign = Campaign {
                    id: self.campaign_id.clone(),
                    ..Default::default()
                };
                campaign.record(CampaignEvent::Opened {
                    capacity: self.capacity,
                });
                campaign.record(CampaignEvent::PartnerEnrolled {
                    partner_id: partner_id.clone(),
                });
                uow.register_new(&mut campaign, CAMPAIGNS)?;
                Ok(enrolled)
            }
        }
    }
}

struct WithdrawPartner {
    campaigns: Arc<dyn Repository>,
    campaign_id: AggregateId,
}

#[async_trait]
impl CommandHandler<CampaignCommand> for WithdrawPartner {
    async fn handle(
        &self,
        command: &Command<CampaignCommand>,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        let CampaignCommand::Withdraw { partner_id } = &command.payload else {
            return Err(CommandError::NoHandler(command.command_type().to_string()));
        };

        let campaign = self.campaigns.load::<Campaign>(&self.campaign_id).await?;
        if let Some(mut campaign) = campaign.filter(|c| c.is_enrolled(partner_id)) {
            campaign.record(CampaignEvent::PartnerWithdrawn {
                partner_id: partner_id.clone(),
            });
            uow.register_updated(&mut campaign, CAMPAIGNS)?;
        }

        Ok(json!({ "campaign_id": self.campaign_id.as_str() }))
    }
}

/// The `campaign_enrollment` step.
pub struct CampaignStep {
    bus: CommandBus<CampaignCommand>,
}

impl CampaignStep {
    /// Enrolls partners into `campaign_id`, opened with `capacity` seats on
    /// first use.
    pub fn new(
        campaigns: Arc<dyn Repository>,
        publisher: Arc<dyn EventPublisher>,
        campaign_id: impl Into<AggregateId>,
        capacity: usize,
    ) -> Result<Self> {
        let campaign_id = campaign_id.into();
        let factory = single_repository_factory(CAMPAIGNS, campaigns.clone(), publisher);

        let mut bus = CommandBus::new(factory);
        bus.register_handler(
            "EnrollPartner",
            Arc::new(EnrollPartner {
                campaigns: campaigns.clone(),
                campaign_id: campaign_id.clone(),
                capacity,
            }),
        )?;
        bus.register_handler(
            "WithdrawPartner",
            Arc::new(WithdrawPartner {
                campaigns,
                campaign_id,
            }),
        )?;
        Ok(Self { bus })
    }

    pub fn bus(&self) -> &CommandBus<CampaignCommand> {
        &self.bus
    }
}

#[async_trait]
impl SagaStep for CampaignStep {
    fn events(&self) -> &StepEvents {
        &CAMPAIGN_ENROLLMENT
    }

    async fn execute(&self, request: &StepRequest) -> std::result::Result<EventData, StepError> {
        let command = Command::with_metadata(
            CampaignCommand::Enroll {
                partner_id: request.require(PARTNER_ID)?.to_string(),
            },
            caused_by(request),
        );
        let value = StepError::check(self.bus.dispatch(&command).await)?;
        Ok(into_fields(value))
    }

    async fn compensate(&self, request: &StepRequest) -> std::result::Result<(), StepError> {
        let command = Command::with_metadata(
            CampaignCommand::Withdraw {
                partner_id: request.require(PARTNER_ID)?.to_string(),
            },
            caused_by(request),
        );
        StepError::check(self.bus.dispatch(&command).await)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{ErrorCode, InMemoryEventPublisher, MessageMetadata, SYSTEM_USER};
    use repository::InMemoryRepository;

    use super::*;

    fn step(capacity: usize) -> (CampaignStep, InMemoryRepository) {
        let campaigns = InMemoryRepository::new();
        let step = CampaignStep::new(
            Arc::new(campaigns.clone()),
            Arc::new(InMemoryEventPublisher::new()),
            DEFAULT_CAMPAIGN,
            capacity,
        )
        .unwrap();
        (step, campaigns)
    }

    fn command(payload: CampaignCommand) -> Command<CampaignCommand> {
        Command::with_metadata(payload, MessageMetadata::new().with_user(SYSTEM_USER))
    }

    fn enroll(partner_id: &str) -> Command<CampaignCommand> {
        command(CampaignCommand::Enroll {
            partner_id: partner_id.into(),
        })
    }

    async fn campaign(repo: &InMemoryRepository) -> Campaign {
        repo.load(&AggregateId::from(DEFAULT_CAMPAIGN))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn enrollment_respects_capacity() {
        let (step, campaigns) = step(2);

        assert!(step.bus().dispatch(&enroll("P1")).await.success);
        assert!(step.bus().dispatch(&enroll("P2")).await.success);
        let third = step.bus().dispatch(&enroll("P3")).await;

        assert_eq!(third.error_code(), Some(ErrorCode::DomainError));
        assert_eq!(campaign(&campaigns).await.enrolled(), ["P1", "P2"]);
    }

    #[tokio::test]
    async fn reenrolling_is_idempotent() {
        let (step, campaigns) = step(1);
        step.bus().dispatch(&enroll("P1")).await;

        let again = step.bus().dispatch(&enroll("P1")).await;
        assert!(again.success);
        assert_eq!(again.events_generated, 0);
        assert_eq!(campaign(&campaigns).await.enrolled(), ["P1"]);
    }

    #[tokio::test]
    async fn withdrawal_frees_a_seat() {
        let (step, campaigns) = step(1);
        step.bus().dispatch(&enroll("P1")).await;

        let withdrawn = step
            .bus()
            .dispatch(&command(CampaignCommand::Withdraw {
                partner_id: "P1".into(),
            }))
            .await;
        assert!(withdrawn.success);
        assert!(campaign(&campaigns).await.enrolled().is_empty());
        assert!(step.bus().dispatch(&enroll("P2")).await.success);
    }

    #[tokio::test]
    async fn withdrawing_an_unknown_partner_is_a_no_op() {
        let (step, campaigns) = step(1);
        let result = step
            .bus()
            .dispatch(&command(CampaignCommand::Withdraw {
                partner_id: "P1".into(),
            }))
            .await;
        assert!(result.success);
        assert!(campaigns.is_empty().await);
    }

    #[tokio::test]
    async fn zero_capacity_campaign_rejects_everyone() {
        let (step, campaigns) = step(0);
        let result = step.bus().dispatch(&enroll("P1")).await;
        assert_eq!(result.error_code(), Some(ErrorCode::DomainError));
        assert!(campaigns.is_empty().await);
    }
}
