//! Saga error types.

use dispatcher::DispatcherError;
use domain::{CommandResult, ErrorCode, RegistrationError};
use thiserror::Error;

/// Why a saga step or its compensation did not succeed.
///
/// Carried as the `error` field of "failed" and "compensated" events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// The participant is switched off.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The request lacks a field the step needs.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The local command failed.
    #[error("{code}: {message}")]
    Command { code: ErrorCode, message: String },
}

impl StepError {
    /// Converts a failed command result into a step error.
    ///
    /// Successful results yield their value.
    pub fn check(result: CommandResult) -> std::result::Result<serde_json::Value, StepError> {
        match (result.success, result.error) {
            (true, _) => Ok(result.result.unwrap_or(serde_json::Value::Null)),
            (false, Some(error)) => Err(StepError::Command {
                code: error.code,
                message: error.message,
            }),
            (false, None) => Err(StepError::Command {
                code: ErrorCode::InfrastructureError,
                message: "command failed without detail".to_string(),
            }),
        }
    }
}

/// Errors that can occur while running a saga participant or policy.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An inbound event lacks a required field.
    #[error("Event {event_type} is missing field '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    /// A step failed where the caller needed it to succeed.
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    /// Publishing or subscribing failed.
    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// A handler could not be registered.
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// A read-side query failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// A read model could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
