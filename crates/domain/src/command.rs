//! Command and query messages.

use chrono::{DateTime, Utc};
use common::{CorrelationId, MessageId};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// User id stamped on commands issued by services rather than people.
pub const SYSTEM_USER: &str = "system";

/// Identifiers and provenance shared by commands and queries.
///
/// The correlation id is stable for a whole saga instance while the causation
/// id points at the message that directly produced this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Unique id of this message.
    pub id: MessageId,

    /// Saga-wide correlation id.
    pub correlation_id: CorrelationId,

    /// Id of the message that caused this one, if any.
    pub causation_id: Option<MessageId>,

    /// The user on whose behalf the message was issued.
    pub user_id: Option<String>,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl MessageMetadata {
    /// Creates metadata that starts a new correlation chain.
    pub fn new() -> Self {
        Self {
            id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            causation_id: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates metadata for a message caused by another message of the same chain.
    pub fn caused_by(correlation_id: CorrelationId, causation_id: MessageId) -> Self {
        Self {
            correlation_id,
            causation_id: Some(causation_id),
            ..Self::new()
        }
    }

    /// Sets the issuing user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed payload of a command.
///
/// Each bounded context defines an enum of its commands; the variant tag
/// returned by [`CommandPayload::command_type`] is the key handlers are
/// registered under.
pub trait CommandPayload: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the command type name used for routing.
    fn command_type(&self) -> &'static str;

    /// Checks the payload before any handler runs.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Typed payload of a query.
pub trait QueryPayload: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the query type name used for routing.
    fn query_type(&self) -> &'static str;

    /// Checks the payload before any handler runs.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// An immutable request to change state.
#[derive(Debug, Clone)]
pub struct Command<C: CommandPayload> {
    pub metadata: MessageMetadata,
    pub payload: C,
}

impl<C: CommandPayload> Command<C> {
    /// Creates a command that starts a new correlation chain.
    pub fn new(payload: C) -> Self {
        Self {
            metadata: MessageMetadata::new(),
            payload,
        }
    }

    /// Creates a command with explicit metadata.
    pub fn with_metadata(payload: C, metadata: MessageMetadata) -> Self {
        Self { metadata, payload }
    }

    /// Returns the command id.
    pub fn id(&self) -> &MessageId {
        &self.metadata.id
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.metadata.correlation_id
    }

    /// Returns the command type name.
    pub fn command_type(&self) -> &'static str {
        self.payload.command_type()
    }

    /// Validates the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.payload.validate()
    }
}

/// An immutable request to read state.
#[derive(Debug, Clone)]
pub struct Query<Q: QueryPayload> {
    pub metadata: MessageMetadata,
    pub payload: Q,
}

impl<Q: QueryPayload> Query<Q> {
    /// Creates a query that starts a new correlation chain.
    pub fn new(payload: Q) -> Self {
        Self {
            metadata: MessageMetadata::new(),
            payload,
        }
    }

    /// Creates a query with explicit metadata.
    pub fn with_metadata(payload: Q, metadata: MessageMetadata) -> Self {
        Self { metadata, payload }
    }

    /// Returns the query id.
    pub fn id(&self) -> &MessageId {
        &self.metadata.id
    }

    /// Returns the query type name.
    pub fn query_type(&self) -> &'static str {
        self.payload.query_type()
    }
}
