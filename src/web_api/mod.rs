//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation at the serde boundary
//! - Response formatting

mod routes;

pub use routes::{create_router, spawn_detection};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let reading = state.system.current_reading().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.system.uptime_sec(),
        alert_status: state.system.alert_status().await,
        connected_observers: state.hub.connection_count() as usize,
        last_sensor_update: reading.map(|r| r.timestamp),
    };

    Json(response)
}

/// Status endpoint: full operational snapshot
pub async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let thresholds = state.system.thresholds().await;

    Json(json!({
        "device_id": state.config.device_id,
        "alert_status": state.system.alert_status().await,
        "current_reading": state.system.current_reading().await,
        "thresholds": thresholds,
        "analysis_in_flight": state.orchestrator.is_busy(),
        "event_store_enabled": state.record_store.is_enabled(),
        "connected_observers": state.hub.connection_count(),
        "recent_events": state.event_log.latest_events(10).await,
    }))
}
