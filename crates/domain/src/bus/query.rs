use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::command::{Query, QueryPayload};
use crate::error::{CommandError, RegistrationError};
use crate::result::QueryResult;

/// Answers one query type from a read model.
#[async_trait]
pub trait QueryHandler<Q: QueryPayload>: Send + Sync {
    async fn handle(&self, query: &Query<Q>) -> Result<serde_json::Value, CommandError>;
}

/// Routes queries to their handlers.
///
/// Queries read committed state only, so no unit of work is opened and
/// nothing is retried.
pub struct QueryBus<Q: QueryPayload> {
    handlers: HashMap<String, Arc<dyn QueryHandler<Q>>>,
}

impl<Q: QueryPayload> QueryBus<Q> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `query_type`.
    pub fn register_handler(
        &mut self,
        query_type: impl Into<String>,
        handler: Arc<dyn QueryHandler<Q>>,
    ) -> Result<(), RegistrationError> {
        let query_type = query_type.into();
        if self.handlers.contains_key(&query_type) {
            return Err(RegistrationError::DuplicateHandler(query_type));
        }
        self.handlers.insert(query_type, handler);
        Ok(())
    }

    /// Dispatches a query and reports its outcome.
    #[tracing::instrument(skip(self, query), fields(query_type = query.query_type()))]
    pub async fn dispatch(&self, query: &Query<Q>) -> QueryResult {
        let start = Instant::now();

        let outcome = match self.handlers.get(query.query_type()) {
            None => Err(CommandError::NoHandler(query.query_type().to_string())),
            Some(handler) => match query.payload.validate() {
                Err(e) => Err(e.into()),
                Ok(()) => handler.handle(query).await,
            },
        };

        match outcome {
            Ok(value) => QueryResult::succeeded(&query.metadata, value, start.elapsed()),
            Err(err) => {
                tracing::debug!(error = %err, "Query failed");
                QueryResult::failed(&query.metadata, &err, start.elapsed())
            }
        }
    }
}

impl<Q: QueryPayload> Default for QueryBus<Q> {
    fn default() -> Self {
        Self::new()
    }
}
