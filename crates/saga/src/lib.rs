//! Choreographed sagas for partner onboarding.
//!
//! There is no central coordinator. Every service reacts to the events of the
//! others on the shared topic:
//! 1. The partner service publishes `PartnerOnboardingInitiated`
//! 2. The contract service creates the contract
//! 3. The campaign service enrolls the partner into a campaign
//! 4. The recruitment service creates the recruitment profile
//!
//! When a step fails, the partner service asks every earlier step to
//! compensate and rejects the partner once all of them confirmed.
//!
//! Each step is run by a [`SagaParticipant`], which de-duplicates
//! redelivered requests and always answers a compensation request.

pub mod availability;
pub mod deployment;
pub mod error;
pub mod ledger;
pub mod onboarding;
pub mod participant;
pub mod state;
pub mod step;

pub use availability::{InMemoryAvailability, ServiceAvailability};
pub use deployment::{Deployment, ParticipantService};
pub use error::{Result, SagaError, StepError};
pub use ledger::StepLedger;
pub use onboarding::campaign::{CampaignStep, DEFAULT_CAMPAIGN};
pub use onboarding::contract::ContractStep;
pub use onboarding::partner::{OnboardingStarted, OnboardingStatus, PartnerOnboarding, PartnerStatus};
pub use onboarding::recruitment::RecruitmentStep;
pub use participant::SagaParticipant;
pub use state::{SagaState, StepState};
pub use step::{SagaStep, StepEvents, StepRequest};
