use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/run", post(handlers::run_code))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
