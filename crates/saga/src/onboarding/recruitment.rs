//! Recruitment service: keeps a recruitment profile per onboarded partner.

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

use super::events::RECRUITMENT_REGISTRATION;
use super::{caused_by, into_fields, single_repository_factory};
use crate::error::{Result, StepError};
use crate::step::{PARTNER_ID, SagaStep, StepEvents, StepRequest};

pub const PROFILES: &str = "recruitment_profiles";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProfileEvent {
    Registered {
        partner_id: String,
        campaign_id: String,
    },
    Removed,
}

impl DomainEvent for ProfileEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProfileEvent::Registered { .. } => "RecruitmentProfileRegistered",
            ProfileEvent::Removed => "RecruitmentProfileDeleted",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecruitmentProfile {
    id: AggregateId,
    partner_id: String,
    campaign_id: String,
    removed: bool,
    version: Version,
    #[serde(skip)]
    pending: PendingEvents<ProfileEvent>,
}

impl RecruitmentProfile {
    pub fn id_for(partner_id: &str) -> AggregateId {
        AggregateId::from(format!("profile-{partner_id}"))
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }
}

impl Aggregate for RecruitmentProfile {
    type Event = ProfileEvent;

    fn aggregate_type() -> &'static str {
        "RecruitmentProfile"
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

    fn pending_events(&self) -> &PendingEvents<ProfileEvent> {
        &self.pending
    }

    fn pending_events_mut(&mut self) -> &mut PendingEvents<ProfileEvent> {
        &mut self.pending
    }

    fn apply(&mut self, event: &ProfileEvent) {
        match event {
            ProfileEvent::Registered {
                partner_id,
                campaign_id,
            } => {
                self.partner_id = partner_id.clone();
                self.campaign_id = campaign_id.clone();
            }
            ProfileEvent::Removed => self.removed = true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecruitmentCommand {
    Register {
        partner_id: String,
        campaign_id: String,
    },
    Remove {
        partner_id: String,
    },
}

impl CommandPayload for RecruitmentCommand {
    fn command_type(&self) -> &'static str {
        match self {
            RecruitmentCommand::Register { .. } => "RegisterRecruitmentProfile",
            RecruitmentCommand::Remove { .. } => "RemoveRecruitmentProfile",
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        match self {
            RecruitmentCommand::Register { campaign_id, .. } if campaign_id.is_empty() => {
                Err(ValidationError::new("campaign_id", "must not be empty"))
            }
            RecruitmentCommand::Register { partner_id, .. }
            | RecruitmentCommand::Remove { partner_id }
                if partner_id.trim().is_empty() =>
            {
                Err(ValidationError::new(PARTNER_ID, "must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

pub struct RecruitmentHandler {
    profiles: Arc<dyn Repository>,
}

#[async_trait]
impl CommandHandler<RecruitmentCommand> for RecruitmentHandler {
    async fn handle(
        &self,
        command: &Command<RecruitmentCommand>,
        uow: &mut UnitOfWork,
    ) -> std::result::Result<serde_json::Value, CommandError> {
        match &command.payload {
            RecruitmentCommand::Register {
                partner_id,
                campaign_id,
            } => {
                let id = RecruitmentProfile::id_for(partner_id);
                if !self.profiles.exists(&id).await? {
                    let mut profile = RecruitmentProfile {
                        id: id.clone(),
                        ..Default::default()
                    };
                    profile.record(ProfileEvent::Registered {
                        partner_id: partner_id.clone(),
                        campaign_id: campaign_id.clone(),
                    });
                    uow.register_new(&mut profile, PROFILES)?;
                }
                Ok(json!({ "profile_id": id.as_str() }))
            }
            RecruitmentCommand::Remove { partner_id } => {
                let id = RecruitmentProfile::id_for(partner_id);
                let profile = self.profiles.load::<RecruitmentProfile>(&id).await?;
                if let Some(mut profile) = profile {
                    profile.record(ProfileEvent::Removed);
                    uow.register_deleted(&mut profile, PROFILES)?;
                }
                Ok(json!({ "profile_id": id.as_str() }))
            }
        }
    }
}

/// The `recruitment_registration` step.
///
/// Requested by `CampaignEnrollmentCompleted`, whose `campaign_id` the
/// profile records.
pub struct RecruitmentStep {
    bus: CommandBus<RecruitmentCommand>,
}

impl RecruitmentStep {
    pub fn new(profiles: Arc<dyn Repository>, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let factory = single_repository_factory(PROFILES, profiles.clone(), publisher);
        let handler = Arc::new(RecruitmentHandler { profiles });

        let mut bus = CommandBus::new(factory);
        bus.register_handler("RegisterRecruitmentProfile", handler.clone())?;
        bus.register_handler("RemoveRecruitmentProfile", handler)?;
        Ok(Self { bus })
    }

    pub fn bus(&self) -> &CommandBus<RecruitmentCommand> {
        &self.bus
    }
}

#[async_trait]
impl SagaStep for RecruitmentStep {
    fn events(&self) -> &StepEvents {
        &RECRUITMENT_REGISTRATION
    }

    async fn execute(&self, request: &StepRequest) -> std::result::Result<EventData, StepError> {
        let command = Command::with_metadata(
            RecruitmentCommand::Register {
                partner_id: request.require(PARTNER_ID)?.to_string(),
                campaign_id: request.require("campaign_id")?.to_string(),
            },
            caused_by(request),
        );
        let value = StepError::check(self.bus.dispatch(&command).await)?;
        Ok(into_fields(value))
    }

    async fn compensate(&self, request: &StepRequest) -> std::result::Result<(), StepError> {
        let command = Command::with_metadata(
            RecruitmentCommand::Remove {
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
    use common::CorrelationId;
    use domain::InMemoryEventPublisher;
    use repository::InMemoryRepository;

    use super::*;

    fn request(data: serde_json::Value) -> StepRequest {
        let serde_json::Value::Object(data) = data else {
            unreachable!()
        };
        StepRequest {
            request_id: "R1".into(),
            message_id: Some("R1".into()),
            correlation_id: CorrelationId::from("C1"),
            saga_id: Some("S1".into()),
            data,
        }
    }

    #[tokio::test]
    async fn register_and_remove_profile() {
        let profiles = InMemoryRepository::new();
        let publisher = InMemoryEventPublisher::new();
        let step = RecruitmentStep::new(Arc::new(profiles.clone()), Arc::new(publisher.clone()))
            .unwrap();
        let req = request(json!({"partner_id": "P1", "campaign_id": "campaign-launch"}));

        let fields = step.execute(&req).await.unwrap();
        assert_eq!(fields.get("profile_id"), Some(&json!("profile-P1")));

        let profile: RecruitmentProfile = profiles
            .load(&RecruitmentProfile::id_for("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.partner_id(), "P1");
        assert_eq!(profile.campaign_id(), "campaign-launch");

        step.compensate(&req).await.unwrap();
        assert!(profiles.is_empty().await);
        assert_eq!(
            publisher.event_types().await,
            vec!["RecruitmentProfileRegistered", "RecruitmentProfileDeleted"]
        );

        // Already gone.
        step.compensate(&req).await.unwrap();
    }

    #[tokio::test]
    async fn campaign_id_is_required() {
        let step = RecruitmentStep::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryEventPublisher::new()),
        )
        .unwrap();

        let err = step
            .execute(&request(json!({"partner_id": "P1"})))
            .await
            .unwrap_err();
        assert_eq!(err, StepError::MissingField("campaign_id"));
    }

    #[tokio::test]
    async fn unavailable_repository_surfaces_as_infrastructure_error() {
        let profiles = InMemoryRepository::new();
        profiles.set_unavailable(true).await;
        let step = RecruitmentStep::new(
            Arc::new(profiles),
            Arc::new(InMemoryEventPublisher::new()),
        )
        .unwrap();

        let err = step
            .execute(&request(json!({"partner_id": "P1", "campaign_id": "K"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Command {
                code: domain::ErrorCode::InfrastructureError,
                ..
            }
        ));
    }
}
