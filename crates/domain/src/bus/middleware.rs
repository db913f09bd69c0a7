//! Command pipeline stages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CommandHandler, HandlerOutput};
use crate::command::{Command, CommandPayload, MessageMetadata};
use crate::error::CommandError;
use crate::unit_of_work::UnitOfWorkFactory;

/// A stage of the command pipeline.
///
/// A middleware either short-circuits with an error or calls
/// [`Next::run`] to hand the command to the rest of the chain.
#[async_trait]
pub trait Middleware<C: CommandPayload>: Send + Sync {
    async fn handle(
        &self,
        command: &Command<C>,
        next: Next<'_, C>,
    ) -> Result<HandlerOutput, CommandError>;
}

/// The handler at the end of the chain plus the factory for its unit of work.
pub(crate) struct Endpoint<'a, C: CommandPayload> {
    pub(crate) handler: &'a dyn CommandHandler<C>,
    pub(crate) factory: &'a UnitOfWorkFactory,
}

impl<C: CommandPayload> Endpoint<'_, C> {
    /// Runs the handler inside a fresh unit of work.
    ///
    /// Commits when the handler succeeds and leaves the unit of work open,
    /// rolls back when it fails.
    async fn invoke(&self, command: &Command<C>) -> Result<HandlerOutput, CommandError> {
        let mut uow = self.factory.begin(&command.metadata);

        match self.handler.handle(command, &mut uow).await {
            Ok(value) => {
                let events_generated = if uow.is_active() {
                    uow.commit().await?.events_published
                } else {
                    0
                };
                Ok(HandlerOutput {
                    value,
                    events_generated,
                })
            }
            Err(e) => {
                if uow.is_active() {
                    uow.rollback()?;
                }
                Err(e)
            }
        }
    }
}

/// Cursor over the remainder of the pipeline.
pub struct Next<'a, C: CommandPayload> {
    chain: &'a [Arc<dyn Middleware<C>>],
    endpoint: &'a Endpoint<'a, C>,
}

impl<'a, C: CommandPayload> Next<'a, C> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware<C>>], endpoint: &'a Endpoint<'a, C>) -> Self {
        Self { chain, endpoint }
    }

    /// Passes the command to the next stage.
    ///
    /// `Next` is `Copy`, so a stage may run the rest of the chain more than
    /// once.
    pub async fn run(self, command: &Command<C>) -> Result<HandlerOutput, CommandError> {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(command, Next::new(rest, self.endpoint))
                    .await
            }
            None => self.endpoint.invoke(command).await,
        }
    }
}

impl<C: CommandPayload> Clone for Next<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: CommandPayload> Copy for Next<'_, C> {}

/// Rejects commands whose payload fails validation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationMiddleware;

#[async_trait]
impl<C: CommandPayload> Middleware<C> for ValidationMiddleware {
    async fn handle(
        &self,
        command: &Command<C>,
        next: Next<'_, C>,
    ) -> Result<HandlerOutput, CommandError> {
        if let Err(e) = command.validate() {
            tracing::debug!(command_type = command.command_type(), error = %e, "Command rejected by validation");
            return Err(e.into());
        }
        next.run(command).await
    }
}

/// Decides whether the issuer of a command may run it.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, metadata: &MessageMetadata, command_type: &str) -> Result<(), String>;
}

/// Accepts any command carrying a non-empty user id.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequireUser;

#[async_trait]
impl Authorizer for RequireUser {
    async fn authorize(&self, metadata: &MessageMetadata, _command_type: &str) -> Result<(), String> {
        match metadata.user_id.as_deref() {
            Some(user) if !user.is_empty() => Ok(()),
            _ => Err("command has no user".to_string()),
        }
    }
}

/// Accepts every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _metadata: &MessageMetadata, _command_type: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Consults an [`Authorizer`] before the handler runs.
#[derive(Clone)]
pub struct SecurityMiddleware {
    authorizer: Arc<dyn Authorizer>,
}

impl SecurityMiddleware {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }
}

impl Default for SecurityMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(RequireUser))
    }
}

#[async_trait]
impl<C: CommandPayload> Middleware<C> for SecurityMiddleware {
    async fn handle(
        &self,
        command: &Command<C>,
        next: Next<'_, C>,
    ) -> Result<HandlerOutput, CommandError> {
        self.authorizer
            .authorize(&command.metadata, command.command_type())
            .await
            .map_err(CommandError::Unauthorized)?;
        next.run(command).await
    }
}

/// Per command type counters kept by [`MetricsMiddleware`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub count: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

impl CommandStats {
    /// Mean duration of the recorded commands.
    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_duration / count,
            Err(_) => Duration::from_secs_f64(self.total_duration.as_secs_f64() / self.count as f64),
        }
    }
}

/// Shared, in-process command statistics.
#[derive(Debug, Clone, Default)]
pub struct CommandStatistics {
    inner: Arc<RwLock<HashMap<String, CommandStats>>>,
}

impl CommandStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, command_type: &str, elapsed: Duration, success: bool) {
        let mut stats = self.inner.write().await;
        let entry = stats.entry(command_type.to_string()).or_default();
        entry.count += 1;
        entry.total_duration += elapsed;
        if !success {
            entry.failures += 1;
        }
    }

    /// Returns the statistics of one command type.
    pub async fn get(&self, command_type: &str) -> Option<CommandStats> {
        self.inner.read().await.get(command_type).copied()
    }

    /// Returns the statistics of every command type seen so far.
    pub async fn snapshot(&self) -> HashMap<String, CommandStats> {
        self.inner.read().await.clone()
    }
}

/// Records per command type counts and latency.
#[derive(Debug, Clone, Default)]
pub struct MetricsMiddleware {
    statistics: CommandStatistics,
}

impl MetricsMiddleware {
    pub fn new(statistics: CommandStatistics) -> Self {
        Self { statistics }
    }
}

#[async_trait]
impl<C: CommandPayload> Middleware<C> for MetricsMiddleware {
    async fn handle(
        &self,
        command: &Command<C>,
        next: Next<'_, C>,
    ) -> Result<HandlerOutput, CommandError> {
        let command_type = command.command_type();
        let start = Instant::now();

        let result = next.run(command).await;

        let elapsed = start.elapsed();
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("commands_dispatched_total", "command_type" => command_type, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("command_duration_seconds", "command_type" => command_type)
            .record(elapsed.as_secs_f64());
        self.statistics
            .record(command_type, elapsed, result.is_ok())
            .await;

        match &result {
            Ok(output) => tracing::info!(
                command_type,
                duration_ms = elapsed.as_millis() as u64,
                events = output.events_generated,
                "Command handled"
            ),
            Err(e) => tracing::warn!(
                command_type,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "Command failed"
            ),
        }
        result
    }
}
