// CLI commands for running and explaining code
use anyhow::{bail, Context, Result};
use coach_common::config::AppConfig;
use coach_common::types::{ExecutionRequest, TimeoutKind, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};
use coach_engine::rules::GENERIC_CONFIDENCE;
use coach_engine::{ExecutionService, PatternClassifier};
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Build an execution request from a source file and optional input
pub fn load_program(
    file: &Path,
    stdin_file: Option<&Path>,
    stdin: Option<String>,
    timeout: u64,
) -> Result<ExecutionRequest> {
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
        bail!(
            "Timeout must be between {} and {} seconds, got {}",
            MIN_TIMEOUT_SECONDS,
            MAX_TIMEOUT_SECONDS,
            timeout
        );
    }

    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if code.is_empty() {
        bail!("{} is empty", file.display());
    }

    let input = match (stdin_file, stdin) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        (None, Some(inline)) => inline,
        (None, None) => String::new(),
    };

    Ok(ExecutionRequest::new(code, input, timeout))
}

pub async fn run_file(
    file: &Path,
    stdin_file: Option<&Path>,
    stdin: Option<String>,
    timeout: u64,
) -> Result<()> {
    let request = load_program(file, stdin_file, stdin, timeout)?;
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let service = ExecutionService::from_config(&config);

    // Ctrl-C kills the sandbox instead of orphaning it
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    eprintln!(
        "🚀 Running {} (timeout {}s, explainer: {})",
        file.display(),
        request.timeout_seconds(),
        service.chain().explainer_name()
    );

    let result = service
        .execute_with_cancel(request, cancel)
        .await
        .context("Sandbox failed to run the program")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub fn classify(error: &str, timeout_kind: TimeoutKind) -> Result<()> {
    let explanation = PatternClassifier::builtin().classify(error, timeout_kind);
    println!("{}", serde_json::to_string_pretty(&explanation)?);
    Ok(())
}

pub fn list_rules() {
    let classifier = PatternClassifier::builtin();

    println!("📋 Pattern rules (first match wins):");
    for (priority, rule) in classifier.rules().iter().enumerate() {
        println!("  {:>2}. {:<20} {:.2}", priority + 1, rule.category.as_str(), rule.confidence);
    }
    println!("   -. {:<20} {:.2}", "generic", GENERIC_CONFIDENCE);
}
