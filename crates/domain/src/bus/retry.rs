//! Bounded retry of transient command failures.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};

use super::HandlerOutput;
use super::middleware::{Middleware, Next};
use crate::command::{Command, CommandPayload};
use crate::error::CommandError;

/// How often and how patiently a command is retried.
///
/// `max_attempts` counts every invocation of the handler, the first one
/// included. Delays grow exponentially from `min_delay` up to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay bounds.
    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Builds the backoff for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Re-runs the rest of the chain while it fails with a retryable error.
///
/// Business-rule, validation and authorization errors are returned after the
/// first attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: CommandPayload> Middleware<C> for RetryMiddleware {
    async fn handle(
        &self,
        command: &Command<C>,
        next: Next<'_, C>,
    ) -> Result<HandlerOutput, CommandError> {
        let command_type = command.command_type();

        (|| next.run(command))
            .retry(self.policy.backoff())
            .when(CommandError::is_retryable)
            .notify(|err: &CommandError, delay: Duration| {
                metrics::counter!("command_retries_total", "command_type" => command_type)
                    .increment(1);
                tracing::warn!(
                    command_type,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying command after transient failure"
                );
            })
            .await
    }
}
