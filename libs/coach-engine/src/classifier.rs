/// Pattern Classifier - Local, Total Failure Explanation
///
/// **Core Responsibility:**
/// Turn raw failure text into an `Explanation` using the ordered rule table.
///
/// **Critical Properties:**
/// - Total: never fails, never returns nothing
/// - Knows nothing about processes or AI providers
/// - Dispatch never changes when categories are added; only the table does

use crate::failure::FailureReport;
use crate::rules::{generic_explanation, FailureText, RuleTable};
use coach_common::types::{Explanation, TimeoutKind};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Arc<RuleTable>,
}

impl PatternClassifier {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(RuleTable::builtin()))
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn classify(&self, raw_error: &str, timeout_kind: TimeoutKind) -> Explanation {
        let normalized = raw_error.to_lowercase();
        let failure = FailureText {
            raw: raw_error,
            normalized: &normalized,
            timeout_kind,
        };

        match self.rules.first_match(&failure) {
            Some(rule) => rule.explain(&failure),
            None => generic_explanation(raw_error),
        }
    }

    pub fn classify_report(&self, report: &FailureReport<'_>) -> Explanation {
        self.classify(report.raw_error, report.timeout_kind)
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GENERIC_CONFIDENCE;
    use coach_common::types::{ErrorCategory, ExplanationSource};

    fn classify(raw: &str) -> Explanation {
        PatternClassifier::builtin().classify(raw, TimeoutKind::None)
    }

    #[test]
    fn test_name_error() {
        let explanation = classify("NameError: name 'x' is not defined");
        assert_eq!(explanation.category, Some(ErrorCategory::NameReference));
        assert_eq!(explanation.confidence, 0.95);
        assert_eq!(explanation.source, ExplanationSource::Pattern);
        assert_eq!(explanation.summary, "You used a variable before defining it.");
    }

    #[test]
    fn test_division_and_modulo_by_zero() {
        for raw in [
            "ZeroDivisionError: division by zero",
            "ZeroDivisionError: integer modulo by zero",
        ] {
            let explanation = classify(raw);
            assert_eq!(explanation.category, Some(ErrorCategory::DivisionByZero));
            assert_eq!(explanation.confidence, 0.95);
        }
    }

    #[test]
    fn test_syntax_error() {
        let explanation = classify("SyntaxError: invalid syntax");
        assert_eq!(explanation.category, Some(ErrorCategory::Syntax));
        assert_eq!(explanation.confidence, 0.85);
        assert!(explanation.corrected_example.is_none());
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let explanation = classify("zerodivisionerror: DIVISION BY ZERO");
        assert_eq!(explanation.category, Some(ErrorCategory::DivisionByZero));
    }

    #[test]
    fn test_timeout_wording_follows_kind() {
        let classifier = PatternClassifier::builtin();

        let busy = classifier.classify("Execution timed out after 2 seconds", TimeoutKind::Busy);
        assert_eq!(busy.category, Some(ErrorCategory::Timeout));
        assert_eq!(busy.confidence, 0.95);
        assert!(busy.summary.contains("too long"));

        let waiting = classifier.classify("Execution timed out after 2 seconds", TimeoutKind::WaitingForInput);
        assert_eq!(waiting.category, Some(ErrorCategory::Timeout));
        assert_eq!(waiting.confidence, 0.95);
        assert!(waiting.summary.contains("waiting for user input"));
        assert_ne!(busy.summary, waiting.summary);
    }

    #[test]
    fn test_timeout_rule_precedes_text_rules() {
        // The text mentions a NameError, but the deadline is what mattered
        let explanation = PatternClassifier::builtin().classify("NameError while timing out", TimeoutKind::Busy);
        assert_eq!(explanation.category, Some(ErrorCategory::Timeout));
    }

    #[test]
    fn test_unmatched_text_is_generic() {
        let explanation = classify("SystemExit: something unusual");
        assert_eq!(explanation.source, ExplanationSource::Generic);
        assert_eq!(explanation.confidence, GENERIC_CONFIDENCE);
        for rule in PatternClassifier::builtin().rules().iter() {
            assert!(explanation.confidence < rule.confidence);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let first = classify("IndexError: list index out of range");
        let second = classify("IndexError: list index out of range");
        assert_eq!(first, second);
        assert_eq!(first.category, Some(ErrorCategory::IndexOutOfRange));
    }

    #[test]
    fn test_supplementary_categories() {
        let cases = [
            ("EOFError: EOF when reading a line", ErrorCategory::MissingInput),
            ("ModuleNotFoundError: No module named 'numpy'", ErrorCategory::MissingModule),
            ("RecursionError: maximum recursion depth exceeded", ErrorCategory::RecursionDepth),
            ("KeyError: 'bob'", ErrorCategory::MissingKey),
            ("TypeError: can only concatenate str (not \"int\") to str", ErrorCategory::TypeMismatch),
            ("ValueError: invalid literal for int() with base 10: 'abc'", ErrorCategory::BadValue),
            ("AttributeError: 'NoneType' object has no attribute 'append'", ErrorCategory::MissingAttribute),
            ("TabError: inconsistent use of tabs and spaces in indentation", ErrorCategory::Indentation),
        ];
        for (raw, category) in cases {
            assert_eq!(classify(raw).category, Some(category), "{}", raw);
        }
    }
}
