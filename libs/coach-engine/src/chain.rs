/// Explanation Chain - Fallback-Safe Orchestration
///
/// **Stage Order:**
/// 1. AI explainer, bounded by the budget the caller hands in
/// 2. Pattern classifier (total), which ends in the generic catch-all
///
/// **Contract:**
/// `build_explanation` always returns a well-formed `Explanation`. Explainer
/// failures are logged and dropped here; they never reach the caller.
/// `source` on the result names the stage that produced it.

use crate::classifier::PatternClassifier;
use crate::error::ExplainerError;
use crate::explainer::{DisabledExplainer, Explainer};
use crate::failure::FailureReport;
use coach_common::types::{Explanation, ExplanationSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ExplanationChain {
    explainer: Arc<dyn Explainer>,
    classifier: PatternClassifier,
}

impl ExplanationChain {
    pub fn new(explainer: Arc<dyn Explainer>, classifier: PatternClassifier) -> Self {
        Self { explainer, classifier }
    }

    /// Chain with no AI stage
    pub fn pattern_only(classifier: PatternClassifier) -> Self {
        Self::new(Arc::new(DisabledExplainer), classifier)
    }

    pub fn classifier(&self) -> &PatternClassifier {
        &self.classifier
    }

    pub fn explainer_name(&self) -> &'static str {
        self.explainer.name()
    }

    pub async fn build_explanation(
        &self,
        code: &str,
        failure: &FailureReport<'_>,
        ai_budget: Duration,
    ) -> Explanation {
        match self.try_explainer(code, failure, ai_budget).await {
            Ok(mut explanation) => {
                explanation.source = ExplanationSource::Ai;
                explanation.confidence = explanation.confidence.clamp(0.0, 1.0);
                explanation
            }
            Err(ExplainerError::NotConfigured) => self.classifier.classify_report(failure),
            Err(ExplainerError::BudgetExhausted) => {
                debug!(explainer = self.explainer.name(), "No time left for AI explainer");
                self.classifier.classify_report(failure)
            }
            Err(e) => {
                warn!(
                    explainer = self.explainer.name(),
                    error = %e,
                    "AI explainer unavailable, falling back to pattern rules"
                );
                self.classifier.classify_report(failure)
            }
        }
    }

    async fn try_explainer(
        &self,
        code: &str,
        failure: &FailureReport<'_>,
        ai_budget: Duration,
    ) -> Result<Explanation, ExplainerError> {
        if !self.explainer.is_configured() {
            return Err(ExplainerError::NotConfigured);
        }
        if ai_budget.is_zero() {
            return Err(ExplainerError::BudgetExhausted);
        }

        match tokio::time::timeout(ai_budget, self.explainer.explain(code, failure)).await {
            Ok(result) => result,
            Err(_) => Err(ExplainerError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coach_common::types::{ErrorCategory, TimeoutKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingExplainer;

    #[async_trait]
    impl Explainer for FailingExplainer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn explain(&self, _code: &str, _failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
            Err(ExplainerError::Status(503))
        }
    }

    struct MalformedExplainer;

    #[async_trait]
    impl Explainer for MalformedExplainer {
        fn name(&self) -> &'static str {
            "malformed"
        }

        async fn explain(&self, _code: &str, _failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
            crate::explainer::parse_ai_explanation("{\"summary\": \"half an answer\"}")
        }
    }

    struct HangingExplainer;

    #[async_trait]
    impl Explainer for HangingExplainer {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn explain(&self, _code: &str, _failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ExplainerError::Timeout)
        }
    }

    #[derive(Default)]
    struct CountingExplainer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Explainer for CountingExplainer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn explain(&self, _code: &str, _failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Explanation {
                summary: "AI summary".to_string(),
                why_it_happened: "AI reason".to_string(),
                how_to_fix: vec!["AI fix".to_string()],
                corrected_example: None,
                confidence: 1.4,
                source: ExplanationSource::Pattern,
                category: None,
            })
        }
    }

    const NAME_ERROR: &str = "NameError: name 'x' is not defined";

    fn chain_with(explainer: Arc<dyn Explainer>) -> ExplanationChain {
        ExplanationChain::new(explainer, PatternClassifier::builtin())
    }

    fn pattern_alone(raw: &str) -> Explanation {
        PatternClassifier::builtin().classify(raw, TimeoutKind::None)
    }

    #[tokio::test]
    async fn test_unconfigured_ai_uses_pattern() {
        let chain = ExplanationChain::pattern_only(PatternClassifier::builtin());
        let explanation = chain
            .build_explanation("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::from_secs(5))
            .await;

        assert_eq!(explanation.source, ExplanationSource::Pattern);
        assert_eq!(explanation.category, Some(ErrorCategory::NameReference));
        assert_eq!(explanation.confidence, 0.95);
    }

    #[tokio::test]
    async fn test_failing_ai_matches_pattern_alone() {
        for explainer in [
            Arc::new(FailingExplainer) as Arc<dyn Explainer>,
            Arc::new(MalformedExplainer) as Arc<dyn Explainer>,
        ] {
            let explanation = chain_with(explainer)
                .build_explanation("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::from_secs(5))
                .await;
            assert_eq!(explanation, pattern_alone(NAME_ERROR));
            assert_eq!(explanation.source, ExplanationSource::Pattern);
        }
    }

    #[tokio::test]
    async fn test_hanging_ai_is_cut_off_by_budget() {
        let chain = chain_with(Arc::new(HangingExplainer));
        let started = std::time::Instant::now();
        let explanation = chain
            .build_explanation("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::from_millis(100))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(explanation, pattern_alone(NAME_ERROR));
    }

    #[tokio::test]
    async fn test_successful_ai_is_tagged_and_clamped() {
        let explainer = Arc::new(CountingExplainer::default());
        let chain = chain_with(explainer.clone());
        let explanation = chain
            .build_explanation("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::from_secs(5))
            .await;

        assert_eq!(explanation.source, ExplanationSource::Ai);
        assert_eq!(explanation.summary, "AI summary");
        assert_eq!(explanation.confidence, 1.0);
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_skips_ai() {
        let explainer = Arc::new(CountingExplainer::default());
        let chain = chain_with(explainer.clone());
        let explanation = chain
            .build_explanation("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::ZERO)
            .await;

        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(explanation.source, ExplanationSource::Pattern);
    }

    #[tokio::test]
    async fn test_zero_budget_without_ai_is_not_configured() {
        let chain = ExplanationChain::pattern_only(PatternClassifier::builtin());
        let result = chain
            .try_explainer("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::ZERO)
            .await;
        assert!(matches!(result, Err(ExplainerError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_zero_budget_with_ai_is_budget_exhausted() {
        let explainer = Arc::new(CountingExplainer::default());
        let result = chain_with(explainer.clone())
            .try_explainer("print(x)", &FailureReport::runtime(NAME_ERROR), Duration::ZERO)
            .await;

        assert!(matches!(result, Err(ExplainerError::BudgetExhausted)));
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_error_falls_through_to_generic() {
        let explanation = chain_with(Arc::new(FailingExplainer))
            .build_explanation("raise SystemExit('odd')", &FailureReport::runtime("odd"), Duration::from_secs(1))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Generic);
    }
}
