// Error taxonomy for the execution engine
//
// Only `SandboxError` (wrapped in `EngineError`) ever leaves the engine.
// `ExplainerError` is swallowed by the explanation chain.

use std::io;
use thiserror::Error;

/// The sandbox itself could not be created or driven.
/// Distinct from a user program failing.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare sandbox workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to spawn interpreter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("sandboxed process exited before its pid could be read")]
    MissingPid,

    #[error("failed waiting for sandboxed process: {0}")]
    Wait(#[source] io::Error),

    #[error("execution cancelled by caller")]
    Cancelled,
}

/// Why the AI explainer could not produce an explanation
#[derive(Debug, Error)]
pub enum ExplainerError {
    #[error("AI explainer is not configured")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI provider returned status {0}")]
    Status(u16),

    #[error("AI request exceeded its time budget")]
    Timeout,

    #[error("no time left in the request budget for the AI explainer")]
    BudgetExhausted,

    #[error("AI response could not be parsed: {0}")]
    Parse(String),

    #[error("AI prompt could not be rendered: {0}")]
    Prompt(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("sandbox slot pool has been closed")]
    PoolClosed,
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Sandbox(SandboxError::Cancelled))
    }
}
