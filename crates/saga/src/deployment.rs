//! All onboarding services wired onto one in-process broker.

use std::sync::Arc;

use dispatcher::{
    DispatcherConfig, DispatcherHandle, DispatcherPublisher, EventDispatcher, InMemoryBroker,
};
use repository::InMemoryRepository;

use crate::availability::InMemoryAvailability;
use crate::error::Result;
use crate::onboarding::campaign::{CampaignStep, DEFAULT_CAMPAIGN};
use crate::onboarding::contract::ContractStep;
use crate::onboarding::partner::PartnerOnboarding;
use crate::onboarding::recruitment::RecruitmentStep;
use crate::participant::SagaParticipant;
use crate::step::SagaStep;

pub const PARTNER_SERVICE: &str = "partner-service";
pub const CONTRACT_SERVICE: &str = "contract-service";
pub const CAMPAIGN_SERVICE: &str = "campaign-service";
pub const RECRUITMENT_SERVICE: &str = "recruitment-service";

/// A running participant service.
#[derive(Clone)]
pub struct ParticipantService {
    pub participant: Arc<SagaParticipant>,
    pub availability: InMemoryAvailability,
}

/// Every onboarding service, each with its own dispatcher and repository.
pub struct Deployment {
    pub partners: Arc<PartnerOnboarding>,
    pub contract: ParticipantService,
    pub campaign: ParticipantService,
    pub recruitment: ParticipantService,
    pub contracts: InMemoryRepository,
    pub campaigns: InMemoryRepository,
    pub profiles: InMemoryRepository,
    handles: Vec<DispatcherHandle>,
}

impl Deployment {
    /// Starts the four services on `broker`.
    ///
    /// `base` supplies the topic and broker settings. Service names are fixed.
    pub async fn start(
        broker: &InMemoryBroker,
        base: &DispatcherConfig,
        campaign_capacity: usize,
    ) -> Result<Self> {
        let mut handles = Vec::new();

        let contracts = InMemoryRepository::new();
        let dispatcher = dispatcher_for(broker, base, CONTRACT_SERVICE).await?;
        let step = ContractStep::new(Arc::new(contracts.clone()), publisher(&dispatcher))?;
        let contract = join(Arc::new(step), &dispatcher).await;
        handles.push(dispatcher.start().await?);

        let campaigns = InMemoryRepository::new();
        let dispatcher = dispatcher_for(broker, base, CAMPAIGN_SERVICE).await?;
        let step = CampaignStep::new(
            Arc::new(campaigns.clone()),
            publisher(&dispatcher),
            DEFAULT_CAMPAIGN,
            campaign_capacity,
        )?;
        let campaign = join(Arc::new(step), &dispatcher).await;
        handles.push(dispatcher.start().await?);

        let profiles = InMemoryRepository::new();
        let dispatcher = dispatcher_for(broker, base, RECRUITMENT_SERVICE).await?;
        let step = RecruitmentStep::new(Arc::new(profiles.clone()), publisher(&dispatcher))?;
        let recruitment = join(Arc::new(step), &dispatcher).await;
        handles.push(dispatcher.start().await?);

        let dispatcher = dispatcher_for(broker, base, PARTNER_SERVICE).await?;
        let partners = Arc::new(PartnerOnboarding::new(
            Arc::new(InMemoryRepository::new()),
            dispatcher.clone(),
        )?);
        partners.clone().register().await;
        handles.push(dispatcher.start().await?);

        tracing::info!(topic = %base.topic, "Onboarding services started");
        Ok(Self {
            partners,
            contract,
            campaign,
            recruitment,
            contracts,
            campaigns,
            profiles,
            handles,
        })
    }

    /// Stops every receive loop.
    pub async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown().await;
        }
    }
}

async fn dispatcher_for(
    broker: &InMemoryBroker,
    base: &DispatcherConfig,
    service: &str,
) -> Result<EventDispatcher> {
    let config = base.with_service(service);
    let transport = broker.connect(&config).await?;
    Ok(EventDispatcher::new(&config, Arc::new(transport)))
}

fn publisher(dispatcher: &EventDispatcher) -> Arc<DispatcherPublisher> {
    Arc::new(DispatcherPublisher::new(dispatcher.clone()))
}

async fn join(step: Arc<dyn SagaStep>, dispatcher: &EventDispatcher) -> ParticipantService {
    let availability = InMemoryAvailability::new();
    let participant = Arc::new(
        SagaParticipant::new(step, dispatcher.clone())
            .with_availability(Arc::new(availability.clone())),
    );
    participant.clone().register().await;
    ParticipantService {
        participant,
        availability,
    }
}
