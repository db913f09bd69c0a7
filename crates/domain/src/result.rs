//! Results returned by the command and query buses.

use std::time::Duration;

use common::{CorrelationId, MessageId};
use serde::{Deserialize, Serialize};

use crate::command::MessageMetadata;
use crate::error::CommandError;

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoHandler,
    ValidationError,
    Unauthorized,
    DomainError,
    InfrastructureError,
}

impl ErrorCode {
    /// Returns the code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoHandler => "NO_HANDLER",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::DomainError => "DOMAIN_ERROR",
            ErrorCode::InfrastructureError => "INFRASTRUCTURE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of a failed command or query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&CommandError> for ErrorDetail {
    fn from(err: &CommandError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of dispatching a command.
///
/// Failures are values: the bus never returns an error to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub command_id: MessageId,
    pub correlation_id: CorrelationId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ErrorDetail>,
    pub execution_time: Duration,
    pub events_generated: usize,
}

impl CommandResult {
    /// Builds a successful result.
    pub fn succeeded(
        metadata: &MessageMetadata,
        result: serde_json::Value,
        events_generated: usize,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: true,
            command_id: metadata.id.clone(),
            correlation_id: metadata.correlation_id.clone(),
            result: Some(result),
            error: None,
            execution_time,
            events_generated,
        }
    }

    /// Builds a failure result.
    pub fn failed(metadata: &MessageMetadata, error: &CommandError, execution_time: Duration) -> Self {
        Self {
            success: false,
            command_id: metadata.id.clone(),
            correlation_id: metadata.correlation_id.clone(),
            result: None,
            error: Some(ErrorDetail::from(error)),
            execution_time,
            events_generated: 0,
        }
    }

    /// Returns the failure code, if the command failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Outcome of dispatching a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub query_id: MessageId,
    pub correlation_id: CorrelationId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ErrorDetail>,
    pub execution_time: Duration,
}

impl QueryResult {
    /// Builds a successful result.
    pub fn succeeded(
        metadata: &MessageMetadata,
        result: serde_json::Value,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: true,
            query_id: metadata.id.clone(),
            correlation_id: metadata.correlation_id.clone(),
            result: Some(result),
            error: None,
            execution_time,
        }
    }

    /// Builds a failure result.
    pub fn failed(metadata: &MessageMetadata, error: &CommandError, execution_time: Duration) -> Self {
        Self {
            success: false,
            query_id: metadata.id.clone(),
            correlation_id: metadata.correlation_id.clone(),
            result: None,
            error: Some(ErrorDetail::from(error)),
            execution_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::NoHandler).unwrap();
        assert_eq!(json, "\"NO_HANDLER\"");
        assert_eq!(ErrorCode::DomainError.to_string(), "DOMAIN_ERROR");
    }

    #[test]
    fn failed_result_carries_ids() {
        let metadata = MessageMetadata::new();
        let err = CommandError::domain("partner already active");
        let result = CommandResult::failed(&metadata, &err, Duration::from_millis(3));

        assert!(!result.success);
        assert_eq!(result.command_id, metadata.id);
        assert_eq!(result.correlation_id, metadata.correlation_id);
        assert_eq!(result.error_code(), Some(ErrorCode::DomainError));
        assert!(result.result.is_none());
        assert_eq!(result.events_generated, 0);
    }

    #[test]
    fn succeeded_result() {
        let metadata = MessageMetadata::new();
        let result = CommandResult::succeeded(
            &metadata,
            serde_json::json!({"contract_id": "K1"}),
            2,
            Duration::from_millis(1),
        );

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.events_generated, 2);
    }
}
