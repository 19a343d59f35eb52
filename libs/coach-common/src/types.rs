use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Bounds accepted for a single execution deadline
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Placeholder returned when a successful program printed nothing
pub const NO_OUTPUT_PLACEHOLDER: &str = "(no output)";

/// A validated request to run one program.
///
/// The timeout is clamped on construction, so anything holding an
/// `ExecutionRequest` can rely on it being within
/// [`MIN_TIMEOUT_SECONDS`, `MAX_TIMEOUT_SECONDS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub stdin: String,
    timeout_seconds: u64,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, stdin: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            code: code.into(),
            stdin: stdin.into(),
            timeout_seconds: clamp_timeout(timeout_seconds),
        }
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Clamp a caller-supplied timeout into the accepted range
pub fn clamp_timeout(timeout_seconds: u64) -> u64 {
    timeout_seconds.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Failure,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "error"),
        }
    }
}

/// Why a deadline expired, as far as the runner could tell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    #[default]
    None,
    /// Still computing when the deadline hit (e.g. an infinite loop)
    Busy,
    /// Idle, all input consumed, and the program reads input
    WaitingForInput,
}

impl TimeoutKind {
    pub fn is_timeout(&self) -> bool {
        !matches!(self, TimeoutKind::None)
    }
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::None => write!(f, "none"),
            TimeoutKind::Busy => write!(f, "busy"),
            TimeoutKind::WaitingForInput => write!(f, "waiting_for_input"),
        }
    }
}

/// Raw result of running one program in the sandbox.
///
/// `stdout` is set iff `status` is `Success`, `raw_error` iff `Failure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: Option<String>,
    pub raw_error: Option<String>,
    /// Full captured stderr, kept for logs and the CLI
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed_seconds: f64,
    pub timeout_kind: TimeoutKind,
    pub output_truncated: bool,
}

impl ExecutionOutcome {
    pub fn success(stdout: String, stderr: String, elapsed_seconds: f64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            stdout: Some(stdout),
            raw_error: None,
            stderr,
            exit_code: Some(0),
            elapsed_seconds: elapsed_seconds.max(0.0),
            timeout_kind: TimeoutKind::None,
            output_truncated: false,
        }
    }

    pub fn failure(
        raw_error: String,
        stderr: String,
        exit_code: Option<i32>,
        elapsed_seconds: f64,
        timeout_kind: TimeoutKind,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            stdout: None,
            raw_error: Some(raw_error),
            stderr,
            exit_code,
            elapsed_seconds: elapsed_seconds.max(0.0),
            timeout_kind,
            output_truncated: false,
        }
    }

    pub fn with_truncation(mut self, truncated: bool) -> Self {
        self.output_truncated = truncated;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Which stage of the explanation chain produced an explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Ai,
    Pattern,
    Generic,
}

impl fmt::Display for ExplanationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplanationSource::Ai => write!(f, "ai"),
            ExplanationSource::Pattern => write!(f, "pattern"),
            ExplanationSource::Generic => write!(f, "generic"),
        }
    }
}

/// Failure categories recognised by the pattern rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Timeout,
    NameReference,
    DivisionByZero,
    Indentation,
    Syntax,
    MissingInput,
    MissingModule,
    RecursionDepth,
    IndexOutOfRange,
    MissingKey,
    TypeMismatch,
    BadValue,
    MissingAttribute,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::NameReference => "name-reference",
            ErrorCategory::DivisionByZero => "division-by-zero",
            ErrorCategory::Indentation => "indentation",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::MissingInput => "missing-input",
            ErrorCategory::MissingModule => "missing-module",
            ErrorCategory::RecursionDepth => "recursion-depth",
            ErrorCategory::IndexOutOfRange => "index-out-of-range",
            ErrorCategory::MissingKey => "missing-key",
            ErrorCategory::TypeMismatch => "type-mismatch",
            ErrorCategory::BadValue => "bad-value",
            ErrorCategory::MissingAttribute => "missing-attribute",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner-facing explanation of a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub why_it_happened: String,
    pub how_to_fix: Vec<String>,
    pub corrected_example: Option<String>,
    pub confidence: f64,
    pub source: ExplanationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

/// Response returned to the caller for one execution.
///
/// Exactly one of `output`/`error` is populated, and `explanation`
/// is present iff the status is `Failure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    pub execution_time: f64,
}

impl ExecutionResult {
    pub fn success(output: String, execution_time: f64) -> Self {
        let output = if output.is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            output
        };

        Self {
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
            explanation: None,
            execution_time,
        }
    }

    pub fn failure(error: String, explanation: Explanation, execution_time: f64) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            output: None,
            error: Some(error),
            explanation: Some(explanation),
            execution_time,
        }
    }
}
