/// Response Aggregator - Run, Then Explain
///
/// **Responsibility:**
/// Coordinate the process runner and the explanation chain to produce the
/// final `ExecutionResult`.
///
/// **Architecture:**
/// 1. Take a sandbox slot (bounded concurrency)
/// 2. Run the program with `ProcessRunner` (runner.rs)
/// 3. On failure, ask `ExplanationChain` (chain.rs) for an explanation
/// 4. Return the aggregated result
///
/// `execution_time` covers the runner only; explanation latency is not
/// part of it.

use crate::chain::ExplanationChain;
use crate::classifier::PatternClassifier;
use crate::error::EngineError;
use crate::explainer::explainer_from_config;
use crate::failure::FailureReport;
use crate::runner::ProcessRunner;
use coach_common::config::AppConfig;
use coach_common::types::{ExecutionOutcome, ExecutionRequest, ExecutionResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Reserved at the end of the request budget for serialising the response
const RESPONSE_MARGIN: Duration = Duration::from_millis(500);

pub struct ExecutionService {
    runner: ProcessRunner,
    chain: ExplanationChain,
    slots: Arc<Semaphore>,
    ai_timeout: Duration,
    request_budget: Duration,
}

impl ExecutionService {
    pub fn new(
        runner: ProcessRunner,
        chain: ExplanationChain,
        ai_timeout: Duration,
        request_budget: Duration,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(runner.config().max_concurrent_executions.max(1)));
        Self {
            runner,
            chain,
            slots,
            ai_timeout,
            request_budget,
        }
    }

    /// Wire up runner, rule table and explainer from startup configuration
    pub fn from_config(config: &AppConfig) -> Self {
        let chain = ExplanationChain::new(explainer_from_config(config), PatternClassifier::builtin());
        Self::new(
            ProcessRunner::new(config.sandbox.clone()),
            chain,
            config.ai_timeout,
            config.request_budget,
        )
    }

    pub fn chain(&self) -> &ExplanationChain {
        &self.chain
    }

    /// Sandbox slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        self.execute_with_cancel(request, CancellationToken::new()).await
    }

    /// Execute with a caller-controlled cancellation token. Cancelling kills
    /// the sandbox and yields `EngineError::Sandbox(SandboxError::Cancelled)`.
    pub async fn execute_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let execution_id = Uuid::new_v4();
        let span = info_span!("execution", execution_id = %execution_id);

        async move {
            let received = Instant::now();
            let outcome = self.run_in_slot(&request, &cancel).await?;

            let result = self.aggregate(&request, outcome, received.elapsed()).await;

            info!(
                status = %result.status,
                execution_time = result.execution_time,
                explanation_source = ?result.explanation.as_ref().map(|e| e.source),
                "Execution completed"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn run_in_slot(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, EngineError> {
        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;

        Ok(self.runner.run(request, cancel).await?)
    }

    async fn aggregate(
        &self,
        request: &ExecutionRequest,
        outcome: ExecutionOutcome,
        spent: Duration,
    ) -> ExecutionResult {
        let execution_time = outcome.elapsed_seconds;

        if outcome.is_success() {
            return ExecutionResult::success(outcome.stdout.unwrap_or_default(), execution_time);
        }

        let raw_error = outcome.raw_error.unwrap_or_default();
        let report = FailureReport::new(&raw_error, outcome.timeout_kind);
        let explanation = self
            .chain
            .build_explanation(&request.code, &report, self.ai_budget(spent))
            .await;

        ExecutionResult::failure(raw_error, explanation, execution_time)
    }

    /// Time the AI stage may use: its own limit, cut down to whatever is
    /// left of the request budget
    pub fn ai_budget(&self, spent: Duration) -> Duration {
        let remaining = self
            .request_budget
            .saturating_sub(spent)
            .saturating_sub(RESPONSE_MARGIN);
        self.ai_timeout.min(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_common::config::SandboxConfig;

    fn service(ai_timeout: Duration, request_budget: Duration) -> ExecutionService {
        ExecutionService::new(
            ProcessRunner::new(SandboxConfig::default()),
            ExplanationChain::pattern_only(PatternClassifier::builtin()),
            ai_timeout,
            request_budget,
        )
    }

    #[test]
    fn test_ai_budget_uses_configured_timeout_when_time_remains() {
        let service = service(Duration::from_secs(8), Duration::from_secs(90));
        assert_eq!(service.ai_budget(Duration::from_secs(2)), Duration::from_secs(8));
    }

    #[test]
    fn test_ai_budget_shrinks_to_remaining_time() {
        let service = service(Duration::from_secs(8), Duration::from_secs(90));
        assert_eq!(
            service.ai_budget(Duration::from_secs(85)),
            Duration::from_millis(4500)
        );
    }

    #[test]
    fn test_ai_budget_is_zero_when_exhausted() {
        let service = service(Duration::from_secs(8), Duration::from_secs(90));
        assert_eq!(service.ai_budget(Duration::from_secs(95)), Duration::ZERO);
    }

    #[test]
    fn test_slots_follow_config() {
        let service = service(Duration::from_secs(8), Duration::from_secs(90));
        assert_eq!(service.available_slots(), SandboxConfig::default().max_concurrent_executions);
    }
}
