//! Sandboxed execution and failure explanation for learner code.
//!
//! The public entry point is [`ExecutionService`]: it runs a program through
//! [`ProcessRunner`] and, when the run fails, attaches an explanation from
//! [`ExplanationChain`].

pub mod aggregator;
pub mod chain;
pub mod classifier;
pub mod error;
pub mod explainer;
pub mod failure;
pub mod probe;
pub mod rules;
pub mod runner;
pub mod sweep;


pub use aggregator::ExecutionService;
pub use chain::ExplanationChain;
pub use classifier::PatternClassifier;
pub use error::{EngineError, ExplainerError, SandboxError};
pub use explainer::{AzureOpenAiExplainer, DisabledExplainer, Explainer};
pub use failure::FailureReport;
pub use runner::ProcessRunner;
