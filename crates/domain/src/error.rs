//! Kernel error types.

use repository::RepositoryError;
use thiserror::Error;

use crate::result::ErrorCode;
use crate::unit_of_work::{TransactionId, UnitOfWorkState};

/// A command or query payload failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    /// Creates a validation error for a field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Event publication failed after a commit.
#[derive(Debug, Clone, Error)]
#[error("Event publication failed: {0}")]
pub struct PublishError(pub String);

/// Errors raised by a unit of work.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The unit of work was already committed or rolled back.
    #[error("Unit of work {transaction_id} is {state}, expected Draft")]
    InvalidState {
        transaction_id: TransactionId,
        state: UnitOfWorkState,
    },

    /// No repository is registered under the given name.
    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    /// The savepoint belongs to another transaction or was already discarded.
    #[error("Savepoint '{name}' does not belong to transaction {transaction_id}")]
    UnknownSavepoint {
        name: String,
        transaction_id: TransactionId,
    },

    /// No suspended transaction exists under the given id.
    #[error("No suspended transaction {0}")]
    SessionNotFound(TransactionId),

    /// A queued operation failed during commit.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Events could not be handed to the publisher after a successful commit.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UnitOfWorkError {
    /// Returns true for failures that may succeed when the command is retried.
    pub fn is_transient(&self) -> bool {
        match self {
            UnitOfWorkError::Repository(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised while handling a command or query.
///
/// The bus never lets these escape: they are folded into a failure result.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The payload failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The caller is not allowed to issue this command.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A business rule rejected the command.
    #[error("Business rule violated: {0}")]
    Domain(String),

    /// A transient infrastructure failure.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// No handler is registered for the message type.
    #[error("No handler registered for {0}")]
    NoHandler(String),

    /// The unit of work failed.
    #[error("Unit of work error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),
}

impl CommandError {
    /// Wraps a business-rule violation.
    pub fn domain(err: impl std::fmt::Display) -> Self {
        CommandError::Domain(err.to_string())
    }

    /// Wraps a transient infrastructure failure.
    pub fn infrastructure(err: impl std::fmt::Display) -> Self {
        CommandError::Infrastructure(err.to_string())
    }

    /// Returns true if the bus may retry the handler after this error.
    ///
    /// Validation, authorization and business-rule errors never succeed on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CommandError::Infrastructure(_) => true,
            CommandError::UnitOfWork(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns the error code reported in failure results.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Validation(_) => ErrorCode::ValidationError,
            CommandError::Unauthorized(_) => ErrorCode::Unauthorized,
            CommandError::Domain(_) => ErrorCode::DomainError,
            CommandError::NoHandler(_) => ErrorCode::NoHandler,
            CommandError::Infrastructure(_) | CommandError::UnitOfWork(_) => {
                ErrorCode::InfrastructureError
            }
        }
    }
}

/// A handler could not be registered on a bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("A handler is already registered for {0}")]
    DuplicateHandler(String),
}

impl From<RepositoryError> for CommandError {
    fn from(err: RepositoryError) -> Self {
        CommandError::UnitOfWork(UnitOfWorkError::Repository(err))
    }
}
