use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::response::AppError;
use crate::state::AppState;
use crate::store::keys::SCHEMA_VERSION_KEY;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .route("/database", get(database_health))
}

/// Round-trips a read through the meta tree.
fn probe_store(state: &AppState) -> Result<(), String> {
    state
        .store()
        .meta
        .get(SCHEMA_VERSION_KEY.as_bytes())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = probe_store(&state).is_ok();
    Json(serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "uptimeSecs": state.uptime_secs(),
        "store": {
            "healthy": healthy,
            "queueDepth": state.store().queue_depth(),
        }
    }))
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    probe_store(&state).map_err(|e| {
        tracing::warn!(error = %e, "Readiness probe failed");
        AppError::service_unavailable("Store not ready")
    })?;
    Ok(StatusCode::OK)
}

pub async fn database_health(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let result = probe_store(&state);
    let latency_us = start.elapsed().as_micros() as u64;

    Json(serde_json::json!({
        "healthy": result.is_ok(),
        "latencyUs": latency_us,
        "counterRows": state.store().count_counter_rows(),
        "queueDepth": state.store().queue_depth(),
        "error": result.err(),
    }))
}
