//! End-to-end tests of the partner onboarding choreography.
//!
//! Every service runs its own dispatcher on a shared in-memory topic. An
//! observer subscription sees every message in publication order.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, CorrelationId};
use dispatcher::{Consumer, DispatcherConfig, EventData, EventDispatcher, InMemoryBroker, SagaEvent, Transport};
use repository::{InMemoryRepository, RepositoryExt};
use saga::onboarding::campaign::Campaign;
use saga::onboarding::contract::{Contract, ContractStatus};
use saga::onboarding::events::{
    CAMPAIGN_ENROLLMENT, CONTRACT_CREATION, PARTNER_ONBOARDING_COMPLETED, PARTNER_ONBOARDING_FAILED,
    PARTNER_ONBOARDING_INITIATED, RECRUITMENT_REGISTRATION,
};
use saga::{
    ContractStep, DEFAULT_CAMPAIGN, Deployment, PartnerStatus, SagaParticipant, SagaState,
};
use serde_json::{Value, json};

async fn observer(broker: &InMemoryBroker) -> Box<dyn Consumer> {
    let config = DispatcherConfig::default();
    broker
        .transport(config.topic)
        .await
        .consumer("observer")
        .await
        .unwrap()
}

/// Waits for the next event matching `predicate`, returning it together with
/// every event seen before it.
async fn wait_for(
    observer: &mut Box<dyn Consumer>,
    predicate: impl Fn(&SagaEvent) -> bool,
) -> (SagaEvent, Vec<SagaEvent>) {
    let mut seen = Vec::new();
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(5), observer.receive())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .expect("topic closed");
        let event = SagaEvent::decode(&delivery.payload).unwrap();
        if predicate(&event) {
            return (event, seen);
        }
        seen.push(event);
    }
}

fn of_type<'a>(event_type: &'a str, correlation_id: &'a str) -> impl Fn(&SagaEvent) -> bool + 'a {
    move |event| {
        event.event_type == event_type && event.str_field("correlation_id") == Some(correlation_id)
    }
}

fn data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

mod contract_participant {
    use super::*;

    struct Harness {
        broker: InMemoryBroker,
        contracts: InMemoryRepository,
        driver: EventDispatcher,
        handles: Vec<dispatcher::DispatcherHandle>,
    }

    async fn harness() -> Harness {
        let broker = InMemoryBroker::new();
        let contracts = InMemoryRepository::new();

        let config = DispatcherConfig::for_service("contract-service");
        let dispatcher = EventDispatcher::new(&config, Arc::new(broker.connect(&config).await.unwrap()));
        let step = ContractStep::new(
            Arc::new(contracts.clone()),
            Arc::new(dispatcher::DispatcherPublisher::new(dispatcher.clone())),
        )
        .unwrap();
        Arc::new(SagaParticipant::new(Arc::new(step), dispatcher.clone()))
            .register()
            .await;
        let handle = dispatcher.start().await.unwrap();

        let config = DispatcherConfig::for_service("partner-service");
        let driver = EventDispatcher::new(&config, Arc::new(broker.connect(&config).await.unwrap()));

        Harness {
            broker,
            contracts,
            driver,
            handles: vec![handle],
        }
    }

    impl Harness {
        async fn shutdown(self) {
            for handle in self.handles {
                handle.shutdown().await;
            }
        }
    }

    #[tokio::test]
    async fn creates_then_cancels_contract() {
        let h = harness().await;
        let mut observer = observer(&h.broker).await;

        h.driver
            .publish(
                PARTNER_ONBOARDING_INITIATED,
                data(json!({"partner_id": "P1", "correlation_id": "C1"})),
            )
            .await
            .unwrap();
        let (created, _) = wait_for(&mut observer, of_type(CONTRACT_CREATION.completed, "C1")).await;
        assert_eq!(created.str_field("partner_id"), Some("P1"));
        assert_eq!(created.str_field("step"), Some("contract_creation"));
        assert_eq!(created.str_field("contract_id"), Some("contract-P1"));

        let request_id = h
            .driver
            .publish(
                CONTRACT_CREATION.compensate,
                data(json!({"partner_id": "P1", "saga_id": "S1", "correlation_id": "C1"})),
            )
            .await
            .unwrap();
        let (cancelled, _) = wait_for(&mut observer, of_type(CONTRACT_CREATION.compensated, "C1")).await;
        assert_eq!(cancelled.str_field("step"), Some("contract_creation"));
        assert_eq!(cancelled.str_field("saga_id"), Some("S1"));
        assert_eq!(cancelled.causation_id(), Some(request_id));
        assert!(cancelled.str_field("error").is_none());

        let contract: Contract = h
            .contracts
            .load(&Contract::id_for("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contract.status(), ContractStatus::Cancelled);

        // A second request for the same correlation is answered exactly once
        // more, and never with a second ContractCreated.
        h.driver
            .publish(
                CONTRACT_CREATION.compensate,
                data(json!({"partner_id": "P1", "saga_id": "S1", "correlation_id": "C1"})),
            )
            .await
            .unwrap();
        let (again, before) = wait_for(&mut observer, of_type(CONTRACT_CREATION.compensated, "C1")).await;
        assert!(again.str_field("error").is_none());
        assert!(before.iter().all(|e| e.event_type != CONTRACT_CREATION.completed));

        h.shutdown().await;
    }

    #[tokio::test]
    async fn failed_cancel_is_still_confirmed_with_error() {
        let h = harness().await;
        let mut observer = observer(&h.broker).await;

        h.driver
            .publish(
                CONTRACT_CREATION.compensate,
                data(json!({"partner_id": "P2", "saga_id": "S2", "correlation_id": "C2"})),
            )
            .await
            .unwrap();

        let (cancelled, _) = wait_for(&mut observer, of_type(CONTRACT_CREATION.compensated, "C2")).await;
        assert_eq!(cancelled.str_field("step"), Some("contract_creation"));
        assert!(cancelled.str_field("error").unwrap().contains("has no contract"));

        h.shutdown().await;
    }

    #[tokio::test]
    async fn redelivered_request_creates_one_contract() {
        let h = harness().await;
        let mut observer = observer(&h.broker).await;
        let initiated = data(json!({"partner_id": "P1", "correlation_id": "C1"}));

        h.driver.publish(PARTNER_ONBOARDING_INITIATED, initiated.clone()).await.unwrap();
        h.driver.publish(PARTNER_ONBOARDING_INITIATED, initiated).await.unwrap();
        // Processed after both requests.
        h.driver
            .publish(
                CONTRACT_CREATION.compensate,
                data(json!({"partner_id": "P1", "correlation_id": "C1"})),
            )
            .await
            .unwrap();

        let (_, before) = wait_for(&mut observer, of_type(CONTRACT_CREATION.compensated, "C1")).await;
        let created = before
            .iter()
            .filter(|e| e.event_type == CONTRACT_CREATION.completed)
            .count();
        assert_eq!(created, 1);
        assert!(before.iter().all(|e| e.event_type != CONTRACT_CREATION.failed));

        h.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_without_event_id_is_confirmed_once() {
        let h = harness().await;
        let mut observer = observer(&h.broker).await;

        h.driver
            .publish(
                PARTNER_ONBOARDING_INITIATED,
                data(json!({"partner_id": "P1", "correlation_id": "C1"})),
            )
            .await
            .unwrap();
        wait_for(&mut observer, of_type(CONTRACT_CREATION.completed, "C1")).await;

        // Envelope of a foreign publisher that assigns no event_id.
        let raw = serde_json::to_vec(&json!({
            "event_type": CONTRACT_CREATION.compensate,
            "event_data": {
                "partner_id": "P1",
                "saga_id": "S1",
                "correlation_id": "C1",
                "causation_id": "F1",
            },
            "timestamp": 1718000000.25,
            "source": "partner-service",
        }))
        .unwrap();
        let topic = h.broker.transport(DispatcherConfig::default().topic).await;
        topic.send(raw.clone()).await.unwrap();
        topic.send(raw).await.unwrap();
        // Handled after both cancellations.
        h.driver
            .publish(
                PARTNER_ONBOARDING_INITIATED,
                data(json!({"partner_id": "P9", "correlation_id": "C9"})),
            )
            .await
            .unwrap();

        let (_, before) = wait_for(&mut observer, of_type(CONTRACT_CREATION.completed, "C9")).await;
        let cancelled: Vec<_> = before
            .iter()
            .filter(|e| e.event_type == CONTRACT_CREATION.compensated)
            .collect();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].str_field("correlation_id"), Some("C1"));
        assert_eq!(cancelled[0].str_field("step"), Some("contract_creation"));
        assert_eq!(cancelled[0].str_field("saga_id"), Some("S1"));
        assert!(cancelled[0].str_field("error").is_none());
        assert!(cancelled[0].causation_id().is_some());

        let contract: Contract = h
            .contracts
            .load(&Contract::id_for("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contract.status(), ContractStatus::Cancelled);

        h.shutdown().await;
    }

    #[tokio::test]
    async fn request_without_partner_fails_the_step() {
        let h = harness().await;
        let mut observer = observer(&h.broker).await;

        h.driver
            .publish(PARTNER_ONBOARDING_INITIATED, data(json!({"correlation_id": "C3"})))
            .await
            .unwrap();

        let (failed, _) = wait_for(&mut observer, of_type(CONTRACT_CREATION.failed, "C3")).await;
        assert_eq!(failed.str_field("error"), Some("Missing field: partner_id"));
        assert!(h.contracts.is_empty().await);

        h.shutdown().await;
    }
}

mod onboarding {
    use super::*;

    async fn deployment(capacity: usize) -> (InMemoryBroker, Deployment) {
        let broker = InMemoryBroker::new();
        let deployment = Deployment::start(&broker, &DispatcherConfig::default(), capacity)
            .await
            .unwrap();
        (broker, deployment)
    }

    #[tokio::test]
    async fn happy_path_activates_partner() {
        let (broker, d) = deployment(10).await;
        let mut observer = observer(&broker).await;

        let started = d.partners.start("P1", "Acme Corp").await.unwrap();
        let c = started.correlation_id.as_str();

        let (completed, before) = wait_for(&mut observer, of_type(PARTNER_ONBOARDING_COMPLETED, c)).await;
        assert_eq!(completed.str_field("saga_id"), Some(started.saga_id.as_str()));

        let order: Vec<&str> = before
            .iter()
            .filter(|e| e.str_field("correlation_id") == Some(c) && !e.event_data.contains_key("aggregate_type"))
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                PARTNER_ONBOARDING_INITIATED,
                CONTRACT_CREATION.completed,
                CAMPAIGN_ENROLLMENT.completed,
                RECRUITMENT_REGISTRATION.completed,
            ]
        );

        let status = d.partners.status("P1").await.unwrap().unwrap();
        assert_eq!(status.status, PartnerStatus::Active);
        assert_eq!(status.onboarding, SagaState::Completed);
        assert_eq!(d.contracts.len().await, 1);
        assert_eq!(d.profiles.len().await, 1);
        let campaign: Campaign = d
            .campaigns
            .load(&AggregateId::from(DEFAULT_CAMPAIGN))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.enrolled(), ["P1"]);

        d.shutdown().await;
    }

    #[tokio::test]
    async fn unavailable_campaign_service_compensates_contract() {
        let (broker, d) = deployment(10).await;
        let mut observer = observer(&broker).await;
        d.campaign.availability.set_available(false);

        let started = d.partners.start("P1", "Acme Corp").await.unwrap();
        let c = started.correlation_id.as_str();

        let (failed, before) = wait_for(&mut observer, of_type(PARTNER_ONBOARDING_FAILED, c)).await;
        assert_eq!(failed.str_field("failed_step"), Some(CAMPAIGN_ENROLLMENT.name));

        let step_failed = before
            .iter()
            .find(|e| e.event_type == CAMPAIGN_ENROLLMENT.failed)
            .expect("campaign step failure");
        let cancel_request = before
            .iter()
            .find(|e| e.event_type == CONTRACT_CREATION.compensate)
            .expect("contract compensation request");
        assert_eq!(cancel_request.causation_id(), step_failed.event_id());
        let cancelled = before
            .iter()
            .find(|e| e.event_type == CONTRACT_CREATION.compensated)
            .expect("contract cancelled");
        assert!(cancelled.str_field("error").is_none());
        assert!(before.iter().all(|e| e.event_type != RECRUITMENT_REGISTRATION.compensate));

        let contract: Contract = d
            .contracts
            .load(&Contract::id_for("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contract.status(), ContractStatus::Cancelled);
        let status = d.partners.status("P1").await.unwrap().unwrap();
        assert_eq!(status.status, PartnerStatus::Rejected);
        assert_eq!(status.onboarding, SagaState::Failed);
        assert!(d.profiles.is_empty().await);

        d.shutdown().await;
    }

    #[tokio::test]
    async fn full_campaign_rejects_second_partner() {
        let (broker, d) = deployment(1).await;
        let mut observer = observer(&broker).await;

        let first = d.partners.start("P1", "Acme Corp").await.unwrap();
        wait_for(&mut observer, of_type(PARTNER_ONBOARDING_COMPLETED, first.correlation_id.as_str())).await;

        let second = d.partners.start("P2", "Globex").await.unwrap();
        let (failed, _) = wait_for(
            &mut observer,
            of_type(PARTNER_ONBOARDING_FAILED, second.correlation_id.as_str()),
        )
        .await;
        assert!(failed.str_field("reason").unwrap().contains("is full"));

        let p1 = d.partners.status("P1").await.unwrap().unwrap();
        let p2 = d.partners.status("P2").await.unwrap().unwrap();
        assert_eq!(p1.status, PartnerStatus::Active);
        assert_eq!(p2.status, PartnerStatus::Rejected);

        d.shutdown().await;
    }

    #[tokio::test]
    async fn sagas_are_isolated_by_correlation_id() {
        let (broker, d) = deployment(10).await;
        let mut observer = observer(&broker).await;

        let a = d.partners.start("P1", "Acme Corp").await.unwrap();
        let b = d.partners.start("P2", "Globex").await.unwrap();
        assert_ne!(a.correlation_id, b.correlation_id);

        let mut pending: Vec<CorrelationId> = vec![a.correlation_id.clone(), b.correlation_id.clone()];
        while !pending.is_empty() {
            let (event, _) = wait_for(&mut observer, |e| e.event_type == PARTNER_ONBOARDING_COMPLETED).await;
            pending.retain(|c| Some(c.clone()) != event.correlation_id());
        }

        for partner in ["P1", "P2"] {
            let status = d.partners.status(partner).await.unwrap().unwrap();
            assert_eq!(status.status, PartnerStatus::Active);
        }

        d.shutdown().await;
    }
}
