//! Command routing.
//!
//! A [`CommandBus`] resolves the handler of a command, runs it through the
//! middleware pipeline inside a fresh [`UnitOfWork`] and folds every outcome,
//! failures included, into a [`CommandResult`].

mod middleware;
mod query;
mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

pub use middleware::{
    AllowAll, Authorizer, CommandStatistics, CommandStats, MetricsMiddleware, Middleware, Next,
    RequireUser, SecurityMiddleware, ValidationMiddleware,
};
pub use query::{QueryBus, QueryHandler};
pub use retry::{RetryMiddleware, RetryPolicy};

use crate::command::{Command, CommandPayload};
use crate::error::{CommandError, RegistrationError};
use crate::result::CommandResult;
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
use middleware::Endpoint;

/// Handles one or more command types.
#[async_trait]
pub trait CommandHandler<C: CommandPayload>: Send + Sync {
    /// Executes the command, registering every write with `uow`.
    ///
    /// The bus commits the unit of work when this returns `Ok` and the unit
    /// of work is still open, and rolls it back otherwise.
    async fn handle(
        &self,
        command: &Command<C>,
        uow: &mut UnitOfWork,
    ) -> Result<serde_json::Value, CommandError>;

    /// Fallback routing for command types without an exact registration.
    fn can_handle(&self, _command: &Command<C>) -> bool {
        false
    }
}

/// What a successful pass through the pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub value: serde_json::Value,
    pub events_generated: usize,
}

/// Routes commands of payload type `C` to their handlers.
pub struct CommandBus<C: CommandPayload> {
    handlers: HashMap<String, Arc<dyn CommandHandler<C>>>,
    /// Registration order, consulted for `can_handle` fallback.
    order: Vec<Arc<dyn CommandHandler<C>>>,
    middleware: Vec<Arc<dyn Middleware<C>>>,
    factory: UnitOfWorkFactory,
    statistics: CommandStatistics,
}

impl<C: CommandPayload> CommandBus<C> {
    /// Creates a bus with the default pipeline.
    pub fn new(factory: UnitOfWorkFactory) -> Self {
        Self::builder(factory).build()
    }

    /// Creates a builder for customizing the pipeline.
    pub fn builder(factory: UnitOfWorkFactory) -> CommandBusBuilder<C> {
        CommandBusBuilder::new(factory)
    }

    /// Registers `handler` for `command_type`.
    pub fn register_handler(
        &mut self,
        command_type: impl Into<String>,
        handler: Arc<dyn CommandHandler<C>>,
    ) -> Result<(), RegistrationError> {
        let command_type = command_type.into();
        if self.handlers.contains_key(&command_type) {
            return Err(RegistrationError::DuplicateHandler(command_type));
        }
        tracing::debug!(%command_type, "Command handler registered");
        self.order.push(Arc::clone(&handler));
        self.handlers.insert(command_type, handler);
        Ok(())
    }

    /// Returns true if some handler would accept the command.
    pub fn has_handler(&self, command: &Command<C>) -> bool {
        self.resolve(command).is_some()
    }

    /// Returns the statistics recorded by the metrics stage.
    pub fn statistics(&self) -> &CommandStatistics {
        &self.statistics
    }

    /// Returns the unit of work factory handlers run with.
    pub fn factory(&self) -> &UnitOfWorkFactory {
        &self.factory
    }

    fn resolve(&self, command: &Command<C>) -> Option<&Arc<dyn CommandHandler<C>>> {
        self.handlers
            .get(command.command_type())
            .or_else(|| self.order.iter().find(|h| h.can_handle(command)))
    }

    /// Dispatches a command and reports its outcome.
    #[tracing::instrument(
        skip(self, command),
        fields(
            command_type = command.command_type(),
            command_id = %command.id(),
            correlation_id = %command.correlation_id()
        )
    )]
    pub async fn dispatch(&self, command: &Command<C>) -> CommandResult {
        let start = Instant::now();

        let Some(handler) = self.resolve(command) else {
            let err = CommandError::NoHandler(command.command_type().to_string());
            tracing::warn!(error = %err, "Command not routed");
            metrics::counter!(
                "commands_dispatched_total",
                "command_type" => command.command_type(),
                "outcome" => "no_handler"
            )
            .increment(1);
            return CommandResult::failed(&command.metadata, &err, start.elapsed());
        };

        let endpoint = Endpoint {
            handler: handler.as_ref(),
            factory: &self.factory,
        };

        match Next::new(&self.middleware, &endpoint).run(command).await {
            Ok(output) => CommandResult::succeeded(
                &command.metadata,
                output.value,
                output.events_generated,
                start.elapsed(),
            ),
            Err(err) => CommandResult::failed(&command.metadata, &err, start.elapsed()),
        }
    }
}

impl<C: CommandPayload> std::fmt::Debug for CommandBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CommandBus")
            .field("handlers", &types)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CommandBus`].
///
/// The pipeline runs validation, security, metrics, any custom stages and
/// finally retry, which sits closest to the handler.
pub struct CommandBusBuilder<C: CommandPayload> {
    factory: UnitOfWorkFactory,
    authorizer: Arc<dyn Authorizer>,
    retry_policy: RetryPolicy,
    statistics: CommandStatistics,
    custom: Vec<Arc<dyn Middleware<C>>>,
}

impl<C: CommandPayload> CommandBusBuilder<C> {
    fn new(factory: UnitOfWorkFactory) -> Self {
        Self {
            factory,
            authorizer: Arc::new(RequireUser),
            retry_policy: RetryPolicy::default(),
            statistics: CommandStatistics::new(),
            custom: Vec::new(),
        }
    }

    /// Replaces the default [`RequireUser`] authorizer.
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Shares an existing statistics collector.
    pub fn statistics(mut self, statistics: CommandStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Appends a custom stage, run after metrics and before retry.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware<C>>) -> Self {
        self.custom.push(middleware);
        self
    }

    /// Builds the bus.
    pub fn build(self) -> CommandBus<C> {
        let mut middleware: Vec<Arc<dyn Middleware<C>>> = vec![
            Arc::new(ValidationMiddleware),
            Arc::new(SecurityMiddleware::new(self.authorizer)),
            Arc::new(MetricsMiddleware::new(self.statistics.clone())),
        ];
        middleware.extend(self.custom);
        middleware.push(Arc::new(RetryMiddleware::new(self.retry_policy)));

        CommandBus {
            handlers: HashMap::new(),
            order: Vec::new(),
            middleware,
            factory: self.factory,
            statistics: self.statistics,
        }
    }
}
