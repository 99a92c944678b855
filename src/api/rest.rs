// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only:
//
//   GET /api/v1/health      — operational status snapshot
//   GET /api/v1/candidates  — latest ranked analysis
//   GET /api/v1/regime      — current regime classification
//   GET /api/v1/probe       — live provider x capability probe
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candidates", get(candidates))
        .route("/api/v1/regime", get(regime))
        .route("/api/v1/probe", get(probe))
        .layer(cors)
        .with_state(state)
}

/// Operational status.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status_snapshot())
}

/// Latest ranked analysis, or 404 before the first scan completes.
async fn candidates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.last_analysis.read().clone() {
        Some(analysis) => Json(analysis).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no analysis available yet"})),
        )
            .into_response(),
    }
}

/// Current regime classification, or 404 before the first evaluation.
async fn regime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.regime_detector.current() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "regime not yet evaluated"})),
        )
            .into_response(),
    }
}

/// Run the registry-wide probe and return the report.
async fn probe(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.probe_all().await)
}
