// HTTP route handlers for the CodeCoach API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use coach_common::types::{
    ExecutionRequest, DEFAULT_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::metrics;
use crate::AppState;

const SERVICE_NAME: &str = "Code Execution Service";
const RUN_ENDPOINT: &str = "/run";

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl RunRequest {
    /// Check field constraints and build the engine request
    pub fn validate(self) -> Result<ExecutionRequest, ApiError> {
        if self.code.is_empty() {
            return Err(ApiError::Validation("code must not be empty".to_string()));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
            return Err(ApiError::Validation(format!(
                "timeout must be between {} and {} seconds",
                MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
            )));
        }

        Ok(ExecutionRequest::new(
            self.code,
            self.stdin.unwrap_or_default(),
            timeout,
        ))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error while running code".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// POST /run - Execute code and explain any failure
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let request = payload.validate()?;

    match state.executor.execute(request).await {
        Ok(result) => {
            metrics::record_execution(&result);
            Ok((StatusCode::OK, Json(result)))
        }
        Err(e) => {
            // Details stay in the log, the client gets a generic message
            error!(error = %e, "Execution failed inside the sandbox");
            metrics::record_infrastructure_error();
            Err(ApiError::Internal)
        }
    }
}

/// GET /health - Liveness and capability report
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "service": SERVICE_NAME,
            "status": "running",
            "endpoint": RUN_ENDPOINT,
            "ai_enabled": state.ai_enabled,
            "started_at": state.started_at,
        })),
    )
}

/// GET / - Bundled frontend, or a service summary when it is missing
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read_to_string(&state.frontend_index).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            debug!(
                path = %state.frontend_index.display(),
                error = %e,
                "Frontend not available, serving service summary"
            );
            Json(serde_json::json!({
                "service": SERVICE_NAME,
                "status": "running",
                "endpoint": RUN_ENDPOINT,
            }))
            .into_response()
        }
    }
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_endpoint() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_request(code: &str, timeout: Option<u64>) -> RunRequest {
        RunRequest {
            code: code.to_string(),
            stdin: None,
            timeout,
        }
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let request = run_request("print(1)", None).validate().unwrap();
        assert_eq!(request.stdin, "");
        assert_eq!(request.timeout_seconds(), DEFAULT_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_empty_code_is_rejected() {
        assert!(matches!(
            run_request("", None).validate(),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_out_of_range_timeout_is_rejected() {
        for timeout in [0, MAX_TIMEOUT_SECONDS + 1] {
            assert!(matches!(
                run_request("print(1)", Some(timeout)).validate(),
                Err(ApiError::Validation(_))
            ));
        }
        assert!(run_request("print(1)", Some(MAX_TIMEOUT_SECONDS)).validate().is_ok());
    }
}
