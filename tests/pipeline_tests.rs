//! End-to-end detection pipeline scenarios against a stubbed AI service.

use async_trait::async_trait;
use chrono::Utc;
use fireid_server::ai_client::AiClient;
use fireid_server::analysis::AnalysisOrchestrator;
use fireid_server::change_notifier::{BroadcastPublisher, ChangeNotifier, ChatBot, StreamBatch};
use fireid_server::contacts::{Contact, ContactDirectory, ContactType, MemoryContactDirectory};
use fireid_server::error::Result;
use fireid_server::event_log_service::{EventKind, EventLogService};
use fireid_server::event_store::{EventRecordStore, MemoryEventStore};
use fireid_server::evidence::EvidenceArchiver;
use fireid_server::local_buffer::LocalBuffer;
use fireid_server::models::{AlertStatus, RiskEvent, RiskLevel, SensorReading, Thresholds};
use fireid_server::realtime_hub::RealtimeHub;
use fireid_server::state::{AppConfig, AppState, SystemState};
use fireid_server::threshold;
use fireid_server::web_api;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Serve one canned JSON response on a random local port, returning the
/// analyze URL.
async fn stub_ai_service(response: serde_json::Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = axum::Router::new().route(
        "/analyze",
        axum::routing::post(move || {
            let response = response.clone();
            async move { axum::Json(response) }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/analyze", addr)
}

async fn test_state(ai_url: String, store: Arc<MemoryEventStore>) -> AppState {
    // One connection: each sqlite::memory: connection is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let buffer = LocalBuffer::new(pool);
    buffer.init().await.unwrap();

    let system = Arc::new(SystemState::new());
    let event_log = Arc::new(EventLogService::default());
    let hub = Arc::new(RealtimeHub::new());
    let record_store = EventRecordStore::new(store);

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        AiClient::with_timeout(ai_url, Duration::from_secs(2)),
        record_store.clone(),
        EvidenceArchiver::disabled(),
        hub.clone(),
        event_log.clone(),
        "arduino-01".to_string(),
        None,
    ));

    let notifier = Arc::new(ChangeNotifier::new(record_store.clone()));

    AppState {
        config: AppConfig::default(),
        buffer,
        system,
        orchestrator,
        record_store,
        notifier,
        contacts: None,
        hub,
        event_log,
    }
}

fn hot_reading() -> SensorReading {
    SensorReading {
        temperature: 60.0,
        light: 1600.0,
        smoke: 1200.0,
        humidity: Some(5.0),
        timestamp: Utc::now(),
    }
}

#[derive(Default)]
struct RecordingBroadcast {
    published: AtomicUsize,
}

#[async_trait]
impl BroadcastPublisher for RecordingBroadcast {
    async fn publish(&self, _subject: &str, _message: &str) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBot {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatBot for RecordingBot {
    async fn send_message(&self, chat_id: &str, _text: &str) -> Result<()> {
        self.sent.lock().await.push(chat_id.to_string());
        Ok(())
    }
}

/// Render a stored event as the change stream would deliver it
fn stream_batch_for(event: &RiskEvent, old_level: Option<&str>) -> StreamBatch {
    let level = serde_json::to_value(event.risk_level).unwrap();
    let confidence = event
        .ai_result
        .as_ref()
        .map(|r| r.confidence)
        .unwrap_or_default();

    let old = old_level
        .map(|l| {
            format!(
                r#","OldImage": {{"event_id": {{"S": "{}"}}, "risk_level": {{"S": "{}"}}}}"#,
                event.event_id, l
            )
        })
        .unwrap_or_default();

    let json = format!(
        r#"{{"Records": [{{
            "eventName": "MODIFY",
            "dynamodb": {{
                "NewImage": {{
                    "event_id": {{"S": "{}"}},
                    "device_id": {{"S": "{}"}},
                    "timestamp": {{"N": "{}"}},
                    "risk_level": {{"S": {}}},
                    "ai_result": {{"M": {{"confidence": {{"N": "{}"}}}}}}
                }}{}
            }}
        }}]}}"#,
        event.event_id, event.device_id, event.timestamp, level, confidence, old
    );
    serde_json::from_str(&json).unwrap()
}

#[tokio::test]
async fn test_confirmed_fire_scenario() {
    // High-confidence fire verdict from the AI stub
    let ai_url = stub_ai_service(serde_json::json!({
        "fireDetected": true,
        "confidence": 0.92,
        "class": "fire",
        "boxes": [[10, 20, 120, 160]],
    }))
    .await;

    let store = Arc::new(MemoryEventStore::new());
    let state = test_state(ai_url, store.clone()).await;

    // All four metrics breach the default thresholds
    let reading = hot_reading();
    let check = threshold::evaluate(&reading, &Thresholds::default());
    assert!(check.exceeded);
    assert_eq!(check.reasons.len(), 4);

    web_api::spawn_detection(state.clone(), reading, None)
        .await
        .unwrap();

    assert_eq!(state.system.alert_status().await, AlertStatus::Confirmed);

    let events = store.all().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.risk_level, RiskLevel::Confirmed);
    let result = event.ai_result.as_ref().expect("verdict recorded");
    assert!(result.fire_detected);
    assert_eq!(result.confidence, 0.92);

    // Change-stream delivery fans out to every configured channel
    let broadcast = Arc::new(RecordingBroadcast::default());
    let bot = Arc::new(RecordingBot::default());
    let contacts = Arc::new(MemoryContactDirectory::new());
    contacts
        .put_contact(&Contact {
            contact_id: "c1".to_string(),
            contact_type: ContactType::Telegram,
            value: "555".to_string(),
            name: "Ops".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let notifier = ChangeNotifier::new(state.record_store.clone())
        .with_broadcast(broadcast.clone())
        .with_chat_bot(bot.clone(), Some("static-chat".to_string()))
        .with_contacts(contacts);

    let summary = notifier
        .process_batch(stream_batch_for(event, Some("RISK")))
        .await;

    assert_eq!(summary.fanned_out, 1);
    assert_eq!(broadcast.published.load(Ordering::SeqCst), 1);
    let chats = bot.sent.lock().await;
    assert_eq!(chats.as_slice(), ["static-chat", "555"]);
}

#[tokio::test]
async fn test_low_confidence_risk_scenario() {
    // Fire detected but well under the confirmation bar
    let ai_url = stub_ai_service(serde_json::json!({
        "fireDetected": true,
        "confidence": 0.3,
        "class": "fire",
    }))
    .await;

    let store = Arc::new(MemoryEventStore::new());
    let state = test_state(ai_url, store.clone()).await;

    web_api::spawn_detection(state.clone(), hot_reading(), None)
        .await
        .unwrap();

    assert_eq!(state.system.alert_status().await, AlertStatus::Risk);

    let events = store.all().await;
    assert_eq!(events.len(), 1);
    let event = events[0].clone();
    assert_eq!(event.risk_level, RiskLevel::Risk);

    // RISK never fans out, but the observability timestamp is written once
    let broadcast = Arc::new(RecordingBroadcast::default());
    let notifier =
        ChangeNotifier::new(state.record_store.clone()).with_broadcast(broadcast.clone());

    let summary = notifier
        .process_batch(stream_batch_for(&event, Some("ANALYZING")))
        .await;
    assert_eq!(summary.fanned_out, 0);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.timestamps_set, 1);
    assert_eq!(broadcast.published.load(Ordering::SeqCst), 0);

    let stored = store.get(&event.event_id).await.unwrap();
    let ts = stored.ts_cloud_processed.expect("timestamp written");

    // Re-delivery with the field present does not rewrite it
    let redelivered = stream_batch_for(&stored, Some("RISK"));
    let mut batch = redelivered;
    // The stream image now carries ts_cloud_processed
    batch.records[0]
        .images
        .as_mut()
        .unwrap()
        .new_image
        .as_mut()
        .unwrap()
        .insert(
            "ts_cloud_processed".to_string(),
            serde_json::json!({"N": ts.to_string()}),
        );

    let summary = notifier.process_batch(batch).await;
    assert_eq!(summary.timestamps_set, 0);
    assert_eq!(store.get(&event.event_id).await.unwrap().ts_cloud_processed, Some(ts));
}

#[tokio::test]
async fn test_calm_reading_recovers_risk_status() {
    let ai_url = stub_ai_service(serde_json::json!({})).await;
    let store = Arc::new(MemoryEventStore::new());
    let state = test_state(ai_url, store).await;

    state.system.set_alert_status(AlertStatus::Risk).await;
    assert_eq!(
        state.system.recover_alert().await,
        Some(AlertStatus::Normal)
    );

    state.system.set_alert_status(AlertStatus::Confirmed).await;
    assert_eq!(state.system.recover_alert().await, None);
    assert_eq!(state.system.alert_status().await, AlertStatus::Confirmed);
}

#[tokio::test]
async fn test_status_endpoint_reports_recent_events() {
    let ai_url = stub_ai_service(serde_json::json!({})).await;
    let store = Arc::new(MemoryEventStore::new());
    let state = test_state(ai_url, store).await;

    state
        .event_log
        .log(EventKind::Alert, "Incendio Confirmado", None)
        .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = web_api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let body: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let recent = body["recent_events"].as_array().expect("recent_events array");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["message"], "Incendio Confirmado");
}
