//! Runs every onboarding service in one process and onboards the partners
//! named on the command line.
//!
//! ```text
//! CAMPAIGN_CAPACITY=1 LOG_FORMAT=json cargo run -p saga --bin onboarding -- P1 P2
//! ```

use std::collections::HashSet;
use std::time::Duration;

use dispatcher::{DispatcherConfig, InMemoryBroker, SagaEvent, Transport, init_tracing};
use saga::onboarding::events::{PARTNER_ONBOARDING_COMPLETED, PARTNER_ONBOARDING_FAILED};
use saga::{Deployment, SagaError};

const DEFAULT_CAPACITY: usize = 100;
const SAGA_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> saga::Result<()> {
    // 1. Configuration and tracing
    let config = DispatcherConfig::from_lookup(|key| {
        std::env::var(key)
            .ok()
            .or_else(|| (key == "SERVICE_NAME").then(|| "onboarding".to_string()))
    })?;
    init_tracing(&config)?;

    let capacity = std::env::var("CAMPAIGN_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CAPACITY);

    // 2. Services
    let broker = InMemoryBroker::new();
    let mut outcomes = broker
        .transport(config.topic.as_str())
        .await
        .consumer("onboarding-monitor")
        .await?;
    let deployment = Deployment::start(&broker, &config, capacity).await?;

    // 3. Start one saga per partner
    let mut partners: Vec<String> = std::env::args().skip(1).collect();
    if partners.is_empty() {
        partners.push("partner-1".to_string());
    }
    let mut running = HashSet::new();
    for partner_id in &partners {
        let started = deployment.partners.start(partner_id, partner_id).await?;
        running.insert(started.correlation_id);
    }

    // 4. Wait until every saga finished
    let wait = async {
        while !running.is_empty() {
            let Some(delivery) = outcomes.receive().await? else {
                break;
            };
            let Ok(event) = SagaEvent::decode(&delivery.payload) else {
                continue;
            };
            let finished = event.event_type == PARTNER_ONBOARDING_COMPLETED
                || event.event_type == PARTNER_ONBOARDING_FAILED;
            if let (true, Some(correlation_id)) = (finished, event.correlation_id()) {
                running.remove(&correlation_id);
            }
        }
        Ok::<(), SagaError>(())
    };
    match tokio::time::timeout(SAGA_TIMEOUT, wait).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(remaining = running.len(), "Timed out waiting for sagas"),
    }

    for partner_id in &partners {
        if let Some(status) = deployment.partners.status(partner_id).await? {
            tracing::info!(
                partner_id = %partner_id,
                status = ?status.status,
                onboarding = %status.onboarding,
                failed_step = status.failed_step.as_deref(),
                reason = status.failure_reason.as_deref(),
                "Onboarding finished"
            );
        }
    }

    deployment.shutdown().await;
    Ok(())
}
