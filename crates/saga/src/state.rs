//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// Progress of a whole onboarding saga, as tracked by its initiator.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,
    Running,
    Compensating,
    Completed,
    Failed,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    /// Returns true while completed steps may still be recorded.
    pub fn can_advance(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of one step at one participant, per correlation id.
///
/// ```text
/// Requested ──► Executing ──┬──► Completed
///                           └──► Failed ──► Executing (redelivery)
/// CompensateRequested ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Requested,
    Executing,
    Completed,
    Failed,
    CompensateRequested,
    Compensated,
}

impl StepState {
    /// Returns true if a new request for the step should run it.
    pub fn accepts_request(&self) -> bool {
        matches!(self, StepState::Requested | StepState::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Compensated
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Requested => "REQUESTED",
            StepState::Executing => "EXECUTING",
            StepState::Completed => "COMPLETED",
            StepState::Failed => "FAILED",
            StepState::CompensateRequested => "COMPENSATE_REQUESTED",
            StepState::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_transitions() {
        assert!(SagaState::NotStarted.can_run());
        assert!(!SagaState::Running.can_run());
        assert!(SagaState::Running.can_advance());
        assert!(SagaState::Running.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(!SagaState::Compensating.can_advance());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
    }

    #[test]
    fn test_step_requests() {
        assert!(StepState::Requested.accepts_request());
        assert!(StepState::Failed.accepts_request());
        assert!(!StepState::Executing.accepts_request());
        assert!(!StepState::Completed.accepts_request());
        assert!(!StepState::Compensated.accepts_request());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::Compensating.to_string(), "Compensating");
        assert_eq!(
            StepState::CompensateRequested.to_string(),
            "COMPENSATE_REQUESTED"
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&SagaState::Running).unwrap();
        let state: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, SagaState::Running);
    }
}
