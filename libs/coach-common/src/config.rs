// Process-wide startup configuration
// Read once from the environment and never mutated afterwards

use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::types::MAX_TIMEOUT_SECONDS;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_PYTHON_BIN: &str = "python3";
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 8;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;
pub const DEFAULT_REQUEST_BUDGET_SECONDS: u64 = 90;
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 8000;
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_FRONTEND_INDEX: &str = "frontend/index.html";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error(
        "request budget of {budget_seconds}s cannot hold a {max_timeout_seconds}s execution plus a {ai_timeout_ms}ms AI call"
    )]
    BudgetTooSmall {
        budget_seconds: u64,
        max_timeout_seconds: u64,
        ai_timeout_ms: u64,
    },
}

/// Azure OpenAI credentials. Present only when endpoint, key and
/// deployment are all set.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub deployment: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub python_bin: String,
    pub max_concurrent_executions: usize,
    /// Per-stream capture cap; excess output is drained and dropped
    pub max_output_bytes: usize,
    /// Address-space limit for the child, 0 disables it
    pub memory_limit_mb: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: DEFAULT_PYTHON_BIN.to_string(),
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub sandbox: SandboxConfig,
    pub ai: Option<AiConfig>,
    pub ai_timeout: Duration,
    /// Total time a single request may take, execution plus explanation
    pub request_budget: Duration,
    pub frontend_index: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sandbox: SandboxConfig::default(),
            ai: None,
            ai_timeout: Duration::from_millis(DEFAULT_AI_TIMEOUT_MS),
            request_budget: Duration::from_secs(DEFAULT_REQUEST_BUDGET_SECONDS),
            frontend_index: PathBuf::from(DEFAULT_FRONTEND_INDEX),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            sandbox: SandboxConfig {
                python_bin: lookup("PYTHON_BIN")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_PYTHON_BIN.to_string()),
                max_concurrent_executions: parse_or(
                    &lookup,
                    "MAX_CONCURRENT_EXECUTIONS",
                    DEFAULT_MAX_CONCURRENT_EXECUTIONS,
                ),
                max_output_bytes: parse_or(&lookup, "MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES),
                memory_limit_mb: parse_or(&lookup, "MEMORY_LIMIT_MB", DEFAULT_MEMORY_LIMIT_MB),
            },
            ai: ai_from_lookup(&lookup),
            ai_timeout: Duration::from_millis(parse_or(&lookup, "AI_TIMEOUT_MS", DEFAULT_AI_TIMEOUT_MS)),
            request_budget: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_BUDGET_SECONDS",
                DEFAULT_REQUEST_BUDGET_SECONDS,
            )),
            frontend_index: lookup("FRONTEND_INDEX")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRONTEND_INDEX)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.max_concurrent_executions == 0 {
            return Err(ConfigError::MustBePositive("MAX_CONCURRENT_EXECUTIONS"));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(ConfigError::MustBePositive("MAX_OUTPUT_BYTES"));
        }

        let longest_request = Duration::from_secs(MAX_TIMEOUT_SECONDS) + self.ai_timeout;
        if self.request_budget <= longest_request {
            return Err(ConfigError::BudgetTooSmall {
                budget_seconds: self.request_budget.as_secs(),
                max_timeout_seconds: MAX_TIMEOUT_SECONDS,
                ai_timeout_ms: self.ai_timeout.as_millis() as u64,
            });
        }

        Ok(())
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_some()
    }
}

fn ai_from_lookup<F>(lookup: &F) -> Option<AiConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let endpoint = non_empty("AZURE_OPENAI_ENDPOINT")?;
    let api_key = non_empty("AZURE_OPENAI_API_KEY")?;
    let deployment = non_empty("AZURE_OPENAI_DEPLOYMENT")?;

    Some(AiConfig {
        endpoint: endpoint.trim_end_matches('/').to_string(),
        api_key: SecretString::from(api_key),
        deployment,
        api_version: non_empty("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, "Unparseable configuration value, using default");
                default
            }
        },
        None => default,
    }
}
