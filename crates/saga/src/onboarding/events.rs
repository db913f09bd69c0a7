//! Event catalogue of the partner onboarding saga.
//!
//! Each step is requested by the completion event of the step before it:
//!
//! ```text
//! PartnerOnboardingInitiated ─► contract_creation ─► ContractCreated
//!   ─► campaign_enrollment ─► CampaignEnrollmentCompleted
//!   ─► recruitment_registration ─► RecruitmentProfileCreated
//! ```

use crate::step::StepEvents;

pub const PARTNER_ONBOARDING_INITIATED: &str = "PartnerOnboardingInitiated";
pub const PARTNER_ONBOARDING_COMPLETED: &str = "PartnerOnboardingCompleted";
pub const PARTNER_ONBOARDING_FAILED: &str = "PartnerOnboardingFailed";

pub const CONTRACT_CREATION: StepEvents = StepEvents {
    name: "contract_creation",
    requested: PARTNER_ONBOARDING_INITIATED,
    completed: "ContractCreated",
    failed: "ContractCreationFailed",
    compensate: "ContractCancellationRequested",
    compensated: "ContractCancelled",
};

pub const CAMPAIGN_ENROLLMENT: StepEvents = StepEvents {
    name: "campaign_enrollment",
    requested: CONTRACT_CREATION.completed,
    completed: "CampaignEnrollmentCompleted",
    failed: "CampaignEnrollmentFailed",
    compensate: "CampaignEnrollmentCancellationRequested",
    compensated: "CampaignEnrollmentCancelled",
};

pub const RECRUITMENT_REGISTRATION: StepEvents = StepEvents {
    name: "recruitment_registration",
    requested: CAMPAIGN_ENROLLMENT.completed,
    completed: "RecruitmentProfileCreated",
    failed: "RecruitmentRegistrationFailed",
    compensate: "RecruitmentProfileRemovalRequested",
    compensated: "RecruitmentProfileRemoved",
};

/// Steps in execution order.
pub static STEPS: [StepEvents; 3] = [
    CONTRACT_CREATION,
    CAMPAIGN_ENROLLMENT,
    RECRUITMENT_REGISTRATION,
];

/// Returns the step answering with `event_type` as its completion event.
pub fn step_completed_by(event_type: &str) -> Option<&'static StepEvents> {
    STEPS.iter().find(|step| step.completed == event_type)
}

/// Returns the step answering with `event_type` as its failure event.
pub fn step_failed_by(event_type: &str) -> Option<&'static StepEvents> {
    STEPS.iter().find(|step| step.failed == event_type)
}

/// Returns the step answering with `event_type` as its compensation event.
pub fn step_compensated_by(event_type: &str) -> Option<&'static StepEvents> {
    STEPS.iter().find(|step| step.compensated == event_type)
}

/// Returns the step with the given name.
pub fn step_named(name: &str) -> Option<&'static StepEvents> {
    STEPS.iter().find(|step| step.name == name)
}
