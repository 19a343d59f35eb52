mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use chrono::{DateTime, Utc};
use coach_common::config::AppConfig;
use coach_engine::ExecutionService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub executor: ExecutionService,
    pub ai_enabled: bool,
    pub frontend_index: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            executor: ExecutionService::from_config(config),
            ai_enabled: config.ai_enabled(),
            frontend_index: config.frontend_index.clone(),
            started_at: Utc::now(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("CodeCoach API booting...");

    let config = AppConfig::from_env().context("Invalid configuration")?;

    info!(
        python = %config.sandbox.python_bin,
        slots = config.sandbox.max_concurrent_executions,
        memory_limit_mb = config.sandbox.memory_limit_mb,
        ai_enabled = config.ai_enabled(),
        "Configuration loaded"
    );

    if !config.frontend_index.is_file() {
        info!(
            path = %config.frontend_index.display(),
            "Frontend not found, GET / serves the service summary"
        );
    }

    let state = Arc::new(AppState::from_config(&config));
    info!(explainer = state.executor.chain().explainer_name(), "Explanation chain ready");

    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to run code");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("CodeCoach API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
