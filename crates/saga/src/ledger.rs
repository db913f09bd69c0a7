//! Per-participant bookkeeping of step progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{CorrelationId, MessageId};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::state::StepState;

/// How long finished steps and seen compensation requests are remembered.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: StepState,
    updated: Instant,
}

#[derive(Debug)]
struct LedgerState {
    steps: HashMap<(CorrelationId, String), Entry>,
    compensations: HashMap<MessageId, Instant>,
    last_sweep: Instant,
}

impl LedgerState {
    fn new() -> Self {
        Self {
            steps: HashMap::new(),
            compensations: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    fn set(&mut self, correlation_id: &CorrelationId, step: &str, state: StepState) {
        self.steps.insert(
            (correlation_id.clone(), step.to_string()),
            Entry {
                state,
                updated: Instant::now(),
            },
        );
    }

    /// Drops terminal steps and compensation ids older than `retention`.
    fn evict(&mut self, retention: Duration) -> usize {
        let now = Instant::now();
        let expired = |at: Instant| now.duration_since(at) >= retention;
        let before = self.steps.len() + self.compensations.len();
        self.steps
            .retain(|_, entry| !(entry.state.is_terminal() && expired(entry.updated)));
        self.compensations.retain(|_, seen| !expired(*seen));
        self.last_sweep = now;
        before - self.steps.len() - self.compensations.len()
    }

    fn sweep_if_due(&mut self, retention: Duration) {
        if self.last_sweep.elapsed() >= retention {
            let evicted = self.evict(retention);
            if evicted > 0 {
                tracing::debug!(evicted, "Step ledger entries expired");
            }
        }
    }
}

/// Tracks the state of each step per correlation id.
///
/// Redelivered requests for a step that is executing, completed or
/// compensated are recognised as duplicates. A failed step accepts a new
/// request. Compensation requests are de-duplicated by message id, or by
/// correlation id and step when the request carries no id.
///
/// Finished steps are forgotten once they are older than the retention
/// window, which bounds how late a duplicate can still be recognised.
#[derive(Debug, Clone)]
pub struct StepLedger {
    state: Arc<RwLock<LedgerState>>,
    retention: Duration,
}

impl Default for StepLedger {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that forgets finished steps after `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::new())),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Marks the step as executing if a request should run it.
    ///
    /// Returns false for duplicates.
    pub async fn begin(&self, correlation_id: &CorrelationId, step: &str) -> bool {
        let mut state = self.state.write().await;
        state.sweep_if_due(self.retention);
        let current = state
            .steps
            .get(&(correlation_id.clone(), step.to_string()))
            .map(|entry| entry.state);
        if current.is_some_and(|s| !s.accepts_request()) {
            return false;
        }
        state.set(correlation_id, step, StepState::Executing);
        true
    }

    /// Records the outcome of an execution or compensation.
    pub async fn finish(&self, correlation_id: &CorrelationId, step: &str, outcome: StepState) {
        self.state.write().await.set(correlation_id, step, outcome);
    }

    /// Registers a compensation request.
    ///
    /// With a `request_id`, returns false if the same request message was
    /// already seen. Without one, returns false while a compensation of the
    /// step is pending or done for this correlation id.
    pub async fn begin_compensation(
        &self,
        correlation_id: &CorrelationId,
        step: &str,
        request_id: Option<&MessageId>,
    ) -> bool {
        let mut state = self.state.write().await;
        state.sweep_if_due(self.retention);
        let fresh = match request_id {
            Some(id) => state
                .compensations
                .insert(id.clone(), Instant::now())
                .is_none(),
            None => !matches!(
                state
                    .steps
                    .get(&(correlation_id.clone(), step.to_string()))
                    .map(|entry| entry.state),
                Some(StepState::CompensateRequested | StepState::Compensated)
            ),
        };
        if fresh {
            state.set(correlation_id, step, StepState::CompensateRequested);
        }
        fresh
    }

    /// Returns the state of a step, if it is still remembered.
    pub async fn state(&self, correlation_id: &CorrelationId, step: &str) -> Option<StepState> {
        self.state
            .read()
            .await
            .steps
            .get(&(correlation_id.clone(), step.to_string()))
            .map(|entry| entry.state)
    }

    /// Forgets finished steps and compensation ids older than the retention
    /// window. Returns how many entries were dropped.
    pub async fn evict_expired(&self) -> usize {
        self.state.write().await.evict(self.retention)
    }

    /// Returns the number of remembered steps and compensation ids.
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.steps.len() + state.compensations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: &str = "contract_creation";

    #[tokio::test]
    async fn duplicate_requests_are_ignored() {
        let ledger = StepLedger::new();
        let c1 = CorrelationId::from("C1");

        assert!(ledger.begin(&c1, STEP).await);
        assert!(!ledger.begin(&c1, STEP).await);

        ledger.finish(&c1, STEP, StepState::Completed).await;
        assert!(!ledger.begin(&c1, STEP).await);
        assert_eq!(ledger.state(&c1, STEP).await, Some(StepState::Completed));
    }

    #[tokio::test]
    async fn failed_step_accepts_a_new_attempt() {
        let ledger = StepLedger::new();
        let c1 = CorrelationId::from("C1");

        assert!(ledger.begin(&c1, STEP).await);
        ledger.finish(&c1, STEP, StepState::Failed).await;
        assert!(ledger.begin(&c1, STEP).await);
        assert_eq!(ledger.state(&c1, STEP).await, Some(StepState::Executing));
    }

    #[tokio::test]
    async fn correlations_are_independent() {
        let ledger = StepLedger::new();
        assert!(ledger.begin(&CorrelationId::from("C1"), STEP).await);
        assert!(ledger.begin(&CorrelationId::from("C2"), STEP).await);
    }

    #[tokio::test]
    async fn compensations_deduplicate_by_request_id() {
        let ledger = StepLedger::new();
        let c1 = CorrelationId::from("C1");
        let request = MessageId::from("R1");

        assert!(ledger.begin_compensation(&c1, STEP, Some(&request)).await);
        assert!(!ledger.begin_compensation(&c1, STEP, Some(&request)).await);
        assert!(
            ledger
                .begin_compensation(&c1, STEP, Some(&MessageId::from("R2")))
                .await
        );

        ledger.finish(&c1, STEP, StepState::Compensated).await;
        assert!(!ledger.begin(&c1, STEP).await);
    }

    #[tokio::test]
    async fn compensations_without_id_deduplicate_by_step() {
        let ledger = StepLedger::new();
        let c1 = CorrelationId::from("C1");
        ledger.begin(&c1, STEP).await;
        ledger.finish(&c1, STEP, StepState::Completed).await;

        assert!(ledger.begin_compensation(&c1, STEP, None).await);
        assert!(!ledger.begin_compensation(&c1, STEP, None).await);
        ledger.finish(&c1, STEP, StepState::Compensated).await;
        assert!(!ledger.begin_compensation(&c1, STEP, None).await);

        assert!(
            ledger
                .begin_compensation(&CorrelationId::from("C2"), STEP, None)
                .await
        );
    }

    #[tokio::test]
    async fn finished_steps_expire_after_retention() {
        let ledger = StepLedger::with_retention(Duration::ZERO);
        let done = CorrelationId::from("C1");
        let running = CorrelationId::from("C2");

        ledger.begin(&running, STEP).await;
        ledger.begin(&done, STEP).await;
        ledger
            .begin_compensation(&done, "campaign_enrollment", Some(&MessageId::from("R1")))
            .await;
        ledger.finish(&done, STEP, StepState::Completed).await;

        // The compensation id and the completed step go; the step still
        // executing and the pending compensation stay.
        assert_eq!(ledger.evict_expired().await, 2);
        assert_eq!(ledger.state(&done, STEP).await, None);
        assert_eq!(ledger.state(&running, STEP).await, Some(StepState::Executing));
        assert_eq!(
            ledger.state(&done, "campaign_enrollment").await,
            Some(StepState::CompensateRequested)
        );
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn recent_entries_are_kept() {
        let ledger = StepLedger::new();
        let c1 = CorrelationId::from("C1");
        ledger.begin(&c1, STEP).await;
        ledger.finish(&c1, STEP, StepState::Completed).await;

        assert_eq!(ledger.evict_expired().await, 0);
        assert!(!ledger.begin(&c1, STEP).await);
    }

    #[tokio::test]
    async fn sweeping_keeps_the_ledger_bounded() {
        let ledger = StepLedger::with_retention(Duration::ZERO);
        for i in 0..50 {
            let correlation = CorrelationId::from(format!("C{i}").as_str());
            ledger.begin(&correlation, STEP).await;
            ledger.finish(&correlation, STEP, StepState::Completed).await;
        }

        // Every new request sweeps what finished before it.
        assert_eq!(ledger.len().await, 1);
    }
}
