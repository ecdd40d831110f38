//! Application state
//!
//! Holds all shared components and the in-process system state

use crate::analysis::AnalysisOrchestrator;
use crate::change_notifier::ChangeNotifier;
use crate::contacts::ContactDirectory;
use crate::error::Result;
use crate::event_log_service::EventLogService;
use crate::event_store::EventRecordStore;
use crate::local_buffer::LocalBuffer;
use crate::models::{AlertStatus, SensorReading, Thresholds};
use crate::realtime_hub::RealtimeHub;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite buffer database URL
    pub database_url: String,
    /// AI inference endpoint
    pub ai_analyze_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Logical id of the reporting device
    pub device_id: String,
    /// Camera stream handed to the AI service, when one exists
    pub rtsp_url: Option<String>,
    /// Cloud document-store gateway; unset disables event persistence
    pub store_base_url: Option<String>,
    /// Risk event table name
    pub events_table: String,
    /// Contacts table name
    pub contacts_table: String,
    /// Blob-store gateway; unset disables evidence archiving
    pub object_store_base_url: Option<String>,
    /// Evidence bucket name
    pub evidence_bucket: String,
    /// Broadcast topic endpoint; unset disables broadcast alerts
    pub broadcast_topic_url: Option<String>,
    /// Broadcast topic name
    pub broadcast_topic: String,
    /// Chat bot token; unset disables chat alerts
    pub telegram_bot_token: Option<String>,
    /// Static chat recipient for confirmed-fire alerts
    pub telegram_chat_id: Option<String>,
    /// SMS/WhatsApp gateway endpoint; unset disables gateway alerts
    pub message_gateway_url: Option<String>,
    /// Reconciliation sync interval in seconds
    pub sync_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://fireid.db?mode=rwc".to_string()),
            ai_analyze_url: std::env::var("AI_ANALYZE_URL")
                .unwrap_or_else(|_| "http://192.168.1.50:5000/analyze".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            device_id: std::env::var("DEVICE_ID")
                .unwrap_or_else(|_| "arduino-fire-01".to_string()),
            rtsp_url: std::env::var("RTSP_URL").ok(),
            store_base_url: std::env::var("STORE_BASE_URL").ok(),
            events_table: std::env::var("EVENTS_TABLE")
                .unwrap_or_else(|_| "fire-risk-events".to_string()),
            contacts_table: std::env::var("CONTACTS_TABLE")
                .unwrap_or_else(|_| "fire-contacts".to_string()),
            object_store_base_url: std::env::var("OBJECT_STORE_BASE_URL").ok(),
            evidence_bucket: std::env::var("EVIDENCE_BUCKET")
                .unwrap_or_else(|_| "fire-evidence".to_string()),
            broadcast_topic_url: std::env::var("BROADCAST_TOPIC_URL").ok(),
            broadcast_topic: std::env::var("BROADCAST_TOPIC")
                .unwrap_or_else(|_| "fire-alerts".to_string()),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
            message_gateway_url: std::env::var("MESSAGE_GATEWAY_URL").ok(),
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Local SQLite buffer
    pub buffer: LocalBuffer,
    /// In-process system state
    pub system: Arc<SystemState>,
    /// Single-flight analysis orchestrator
    pub orchestrator: Arc<AnalysisOrchestrator>,
    /// Durable event persistence
    pub record_store: EventRecordStore,
    /// Change-stream alert fan-out
    pub notifier: Arc<ChangeNotifier>,
    /// Cloud contacts directory, when configured
    pub contacts: Option<Arc<dyn ContactDirectory>>,
    /// Realtime observer hub
    pub hub: Arc<RealtimeHub>,
    /// In-memory system event log
    pub event_log: Arc<EventLogService>,
}

/// Process-local mutable state: current alert status, last reading and the
/// active thresholds. No globals; everything hangs off this object.
pub struct SystemState {
    alert_status: RwLock<AlertStatus>,
    current_reading: RwLock<Option<SensorReading>>,
    thresholds: RwLock<Thresholds>,
    started_at: Instant,
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            alert_status: RwLock::new(AlertStatus::Normal),
            current_reading: RwLock::new(None),
            thresholds: RwLock::new(Thresholds::default()),
            started_at: Instant::now(),
        }
    }

    /// Reload persisted state from the local buffer. Called once at startup
    /// so a restart resumes with the last known status and thresholds.
    pub async fn restore_from(&self, buffer: &LocalBuffer) -> Result<()> {
        if let Some(thresholds) = buffer.load_thresholds().await? {
            *self.thresholds.write().await = thresholds;
            tracing::info!("Thresholds restored from local buffer");
        }

        if let Some(status) = buffer.last_alert_status().await? {
            *self.alert_status.write().await = status;
            tracing::info!(status = status.as_wire(), "Alert status restored");
        }

        if let Some(row) = buffer.latest_reading().await? {
            let reading = SensorReading {
                temperature: row.temperature,
                light: row.light,
                smoke: row.smoke,
                humidity: row.humidity,
                timestamp: DateTime::<Utc>::from_timestamp_millis(row.timestamp)
                    .unwrap_or_else(Utc::now),
            };
            *self.current_reading.write().await = Some(reading);
            tracing::info!("Last sensor reading restored");
        }

        Ok(())
    }

    pub async fn alert_status(&self) -> AlertStatus {
        *self.alert_status.read().await
    }

    pub async fn set_alert_status(&self, status: AlertStatus) {
        *self.alert_status.write().await = status;
    }

    /// A calm reading de-escalates Riesgo back to Normal. Confirmado is
    /// sticky and only clears through operator action.
    pub async fn recover_alert(&self) -> Option<AlertStatus> {
        let mut status = self.alert_status.write().await;
        if *status == AlertStatus::Risk {
            *status = AlertStatus::Normal;
            Some(AlertStatus::Normal)
        } else {
            None
        }
    }

    pub async fn current_reading(&self) -> Option<SensorReading> {
        self.current_reading.read().await.clone()
    }

    pub async fn set_current_reading(&self, reading: SensorReading) {
        *self.current_reading.write().await = Some(reading);
    }

    pub async fn thresholds(&self) -> Thresholds {
        *self.thresholds.read().await
    }

    /// Merge a partial update into the active thresholds, returning the
    /// resulting full set. Absent fields keep their current value.
    pub async fn merge_thresholds(
        &self,
        temperature: Option<f64>,
        light: Option<f64>,
        smoke: Option<f64>,
        humidity: Option<f64>,
    ) -> Thresholds {
        let mut thresholds = self.thresholds.write().await;
        if let Some(v) = temperature {
            thresholds.temperature = v;
        }
        if let Some(v) = light {
            thresholds.light = v;
        }
        if let Some(v) = smoke {
            thresholds.smoke = v;
        }
        if let Some(v) = humidity {
            thresholds.humidity = v;
        }
        *thresholds
    }

    pub fn uptime_sec(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recover_only_from_risk() {
        let state = SystemState::new();

        state.set_alert_status(AlertStatus::Risk).await;
        assert_eq!(state.recover_alert().await, Some(AlertStatus::Normal));
        assert_eq!(state.alert_status().await, AlertStatus::Normal);

        state.set_alert_status(AlertStatus::Confirmed).await;
        assert_eq!(state.recover_alert().await, None, "Confirmado is sticky");
        assert_eq!(state.alert_status().await, AlertStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_merge_thresholds_partial() {
        let state = SystemState::new();
        let merged = state
            .merge_thresholds(Some(40.0), None, None, Some(10.0))
            .await;
        assert_eq!(merged.temperature, 40.0);
        assert_eq!(merged.light, 1500.0, "untouched fields keep defaults");
        assert_eq!(merged.humidity, 10.0);
        assert_eq!(state.thresholds().await, merged);
    }

    #[tokio::test]
    async fn test_restore_from_buffer() {
        // One connection: each sqlite::memory: connection is its own database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let buffer = LocalBuffer::new(pool);
        buffer.init().await.unwrap();

        buffer
            .save_thresholds(&Thresholds {
                temperature: 50.0,
                light: 2000.0,
                smoke: 800.0,
                humidity: 10.0,
            })
            .await
            .unwrap();
        buffer
            .set_last_alert_status(AlertStatus::Risk)
            .await
            .unwrap();

        let state = SystemState::new();
        state.restore_from(&buffer).await.unwrap();
        assert_eq!(state.thresholds().await.temperature, 50.0);
        assert_eq!(state.alert_status().await, AlertStatus::Risk);
        assert!(state.current_reading().await.is_none());
    }
}
