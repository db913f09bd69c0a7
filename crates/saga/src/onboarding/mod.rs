//! Partner onboarding: the services taking part in the saga.
//!
//! Each service owns one repository and one [`domain::CommandBus`]. Its
//! [`SagaStep`](crate::SagaStep) turns step requests into commands issued as
//! [`SYSTEM_USER`], caused by the request message.

pub mod campaign;
pub mod contract;
pub mod events;
pub mod partner;
pub mod recruitment;

use std::sync::Arc;

use dispatcher::EventData;
use domain::{EventPublisher, MessageMetadata, SYSTEM_USER, UnitOfWorkFactory};
use repository::{Repository, RepositoryRegistry};
use serde_json::Value;

use crate::step::StepRequest;

/// Builds a unit of work factory over a single named repository.
fn single_repository_factory(
    name: &str,
    repository: Arc<dyn Repository>,
    publisher: Arc<dyn EventPublisher>,
) -> UnitOfWorkFactory {
    let registry = RepositoryRegistry::new().with(name, repository);
    UnitOfWorkFactory::new(Arc::new(registry), publisher)
}

/// Metadata for a command issued on behalf of a saga request.
fn caused_by(request: &StepRequest) -> MessageMetadata {
    MessageMetadata::caused_by(request.correlation_id.clone(), request.request_id.clone())
        .with_user(SYSTEM_USER)
}

/// Turns a handler's JSON object result into event fields.
fn into_fields(value: Value) -> EventData {
    match value {
        Value::Object(fields) => fields,
        _ => EventData::new(),
    }
}
