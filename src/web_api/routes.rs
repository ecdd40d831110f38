//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::change_notifier::StreamBatch;
use crate::contacts::{Contact, CreateContactRequest, UpdateContactRequest};
use crate::error::{Error, Result};
use crate::event_log_service::{EventKind, RequestTrace};
use crate::models::{AlertStatus, ApiResponse, SensorReading};
use crate::realtime_hub::HubMessage;
use crate::state::AppState;
use crate::threshold;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Ingestion & thresholds
        .route("/sensor-data", post(receive_sensor_data))
        .route("/update-thresholds", post(update_thresholds))
        .route("/trigger-analysis", post(trigger_analysis))
        // Observability
        .route("/health", get(super::health_check))
        .route("/status", get(super::system_status))
        .route("/logs", get(get_logs))
        .route("/connections", get(get_connections))
        // Contacts
        .route("/api/contacts", get(list_contacts))
        .route("/api/contacts", post(create_contact))
        .route("/api/contacts/:id", put(update_contact))
        .route("/api/contacts/:id", delete(delete_contact))
        // Change stream trigger
        .route("/api/stream/events", post(receive_stream_events))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace_request,
        ))
        .with_state(state)
}

/// Record one trace per request into the bounded ring
async fn trace_request(State(state): State<AppState>, request: Request, next: Next) -> axum::response::Response {
    let trace = RequestTrace {
        timestamp: Utc::now(),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        remote_addr: request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        user_agent: request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };
    state.event_log.trace_request(trace).await;
    next.run(request).await
}

// ========================================
// Sensor ingestion
// ========================================

#[derive(Debug, Deserialize)]
pub struct SensorDataRequest {
    pub temperature: f64,
    pub light: f64,
    pub smoke: f64,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(rename = "imageBase64", default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SensorDataResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "alertStatus")]
    pub alert_status: AlertStatus,
    #[serde(rename = "thresholdExceeded")]
    pub threshold_exceeded: bool,
    pub reasons: Vec<String>,
}

/// Ingestion endpoint. Always replies 200 once the body parses; analysis
/// runs as a detached task and never blocks the device.
async fn receive_sensor_data(
    State(state): State<AppState>,
    Json(req): Json<SensorDataRequest>,
) -> impl IntoResponse {
    let reading = SensorReading {
        temperature: req.temperature,
        light: req.light,
        smoke: req.smoke,
        humidity: req.humidity,
        timestamp: Utc::now(),
    };

    let thresholds = state.system.thresholds().await;
    let check = threshold::evaluate(&reading, &thresholds);

    state.system.set_current_reading(reading.clone()).await;
    state
        .hub
        .broadcast(HubMessage::SensorData(reading.clone()))
        .await;

    if check.exceeded {
        state
            .event_log
            .log(
                EventKind::Warning,
                "Thresholds exceeded, triggering analysis",
                Some(json!({ "reasons": check.reasons })),
            )
            .await;
        spawn_detection(state.clone(), reading.clone(), req.image_base64);
    } else if let Some(status) = state.system.recover_alert().await {
        if let Err(e) = state.buffer.set_last_alert_status(status).await {
            tracing::error!(error = %e, "Failed to persist alert status");
        }
        state.hub.broadcast(HubMessage::AlertStatus(status)).await;
        state
            .event_log
            .log(EventKind::Alert, "Alert status recovered to Normal", None)
            .await;
    }

    let alert_status = state.system.alert_status().await;

    // Buffer the reading for reconciliation; an outage here must not
    // reject the device's report
    if let Err(e) = state
        .buffer
        .insert_reading(&state.config.device_id, &reading, alert_status)
        .await
    {
        tracing::error!(error = %e, "Failed to buffer reading, continuing");
    }

    Json(SensorDataResponse {
        success: true,
        message: if check.exceeded {
            "Reading accepted, analysis started".to_string()
        } else {
            "Reading accepted".to_string()
        },
        alert_status,
        threshold_exceeded: check.exceeded,
        reasons: check.reasons,
    })
}

/// Run the full detection pipeline as a detached task with its own error
/// boundary. The handle is returned so tests can await completion.
pub fn spawn_detection(
    state: AppState,
    reading: SensorReading,
    image_base64: Option<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match state.orchestrator.run_analysis(reading, image_base64).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "Detection pipeline failed");
                return;
            }
        };

        // Escalate only; de-escalation goes through the recovery rule and
        // Confirmado never downgrades on a failed analysis
        let current = state.system.alert_status().await;
        let next = match outcome.alert_status {
            AlertStatus::Confirmed => Some(AlertStatus::Confirmed),
            AlertStatus::Risk if current != AlertStatus::Confirmed => Some(AlertStatus::Risk),
            _ => None,
        };

        if let Some(status) = next {
            state.system.set_alert_status(status).await;
            if let Err(e) = state.buffer.set_last_alert_status(status).await {
                tracing::error!(error = %e, "Failed to persist alert status");
            }
            state.hub.broadcast(HubMessage::AlertStatus(status)).await;
            state
                .event_log
                .log(
                    EventKind::Alert,
                    format!("Alert status is now {}", status.as_wire()),
                    Some(json!({ "event_id": outcome.event_id })),
                )
                .await;
        }
    })
}

// ========================================
// Thresholds
// ========================================

#[derive(Debug, Deserialize)]
pub struct UpdateThresholdsRequest {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub light: Option<f64>,
    #[serde(default)]
    pub smoke: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

async fn update_thresholds(
    State(state): State<AppState>,
    Json(req): Json<UpdateThresholdsRequest>,
) -> Result<impl IntoResponse> {
    let merged = state
        .system
        .merge_thresholds(req.temperature, req.light, req.smoke, req.humidity)
        .await;

    state.buffer.save_thresholds(&merged).await?;
    state
        .event_log
        .log(
            EventKind::Config,
            "Thresholds updated",
            Some(serde_json::to_value(merged)?),
        )
        .await;

    Ok(Json(ApiResponse::success(merged)))
}

// ========================================
// Manual trigger & observability
// ========================================

async fn trigger_analysis(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let Some(reading) = state.system.current_reading().await else {
        return Err(Error::Validation(
            "No sensor reading available yet".to_string(),
        ));
    };

    state
        .event_log
        .log(EventKind::Analysis, "Manual analysis trigger", None)
        .await;
    spawn_detection(state.clone(), reading, None);

    Ok(Json(ApiResponse::success(json!({
        "message": "Analysis triggered"
    }))))
}

async fn get_logs(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.event_log.events().await))
}

async fn get_connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "connected_observers": state.hub.connection_count(),
        "recent_requests": state.event_log.latest_traces(50).await,
    }))
}

// ========================================
// Contacts
// ========================================

async fn list_contacts(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let Some(directory) = &state.contacts else {
        return Err(Error::Config(
            "Contact directory not configured".to_string(),
        ));
    };
    let contacts = directory.list_contacts().await?;
    Ok(Json(ApiResponse::success(contacts)))
}

/// Create a contact. The local mirror is written first so a directory
/// outage leaves the contact pending for the reconciliation sync.
async fn create_contact(
    State(state): State<AppState>,
    Json(req): Json<CreateContactRequest>,
) -> Result<impl IntoResponse> {
    if req.value.trim().is_empty() {
        return Err(Error::Validation("Contact value is empty".to_string()));
    }

    let contact = Contact::from_request(req);
    state.buffer.insert_contact(&contact).await?;

    if let Some(directory) = &state.contacts {
        match directory.put_contact(&contact).await {
            Ok(()) => {
                state.buffer.mark_contact_synced(&contact.contact_id).await?;
            }
            Err(e) => {
                tracing::warn!(
                    contact_id = %contact.contact_id,
                    error = %e,
                    "Directory push failed, contact kept for sync"
                );
            }
        }
    }

    state
        .event_log
        .log(
            EventKind::Config,
            "Contact created",
            Some(json!({ "contact_id": contact.contact_id })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(contact))))
}

async fn update_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactRequest>,
) -> Result<impl IntoResponse> {
    let Some(directory) = &state.contacts else {
        return Err(Error::Config(
            "Contact directory not configured".to_string(),
        ));
    };
    directory.update_contact(&id, &req).await?;
    Ok(Json(ApiResponse::success(json!({ "contact_id": id }))))
}

async fn delete_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let Some(directory) = &state.contacts else {
        return Err(Error::Config(
            "Contact directory not configured".to_string(),
        ));
    };
    directory.delete_contact(&id).await?;
    if let Err(e) = state.buffer.delete_contact(&id).await {
        tracing::warn!(contact_id = %id, error = %e, "Local contact mirror delete failed");
    }
    Ok(Json(ApiResponse::success(json!({ "contact_id": id }))))
}

// ========================================
// Change stream
// ========================================

async fn receive_stream_events(
    State(state): State<AppState>,
    Json(batch): Json<StreamBatch>,
) -> impl IntoResponse {
    let summary = state.notifier.process_batch(batch).await;

    if summary.fanned_out > 0 {
        state
            .event_log
            .log(
                EventKind::Alert,
                "Confirmed fire alert fanned out",
                Some(json!({ "dispatched": summary.dispatched })),
            )
            .await;
    }

    Json(ApiResponse::success(summary))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut rx) = state.hub.register().await;

    tracing::info!(connection_id = %conn_id, "WebSocket observer connected");

    // Forward hub messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming frames until close
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state.hub.unregister(&conn_id).await;
    tracing::info!(connection_id = %conn_id, "WebSocket observer disconnected");
}
