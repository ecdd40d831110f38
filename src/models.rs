//! Shared models and types for the Fire ID backend
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub alert_status: AlertStatus,
    pub connected_observers: usize,
    pub last_sensor_update: Option<DateTime<Utc>>,
}

/// One sensor reading as reported by the device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub light: f64,
    pub smoke: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Per-metric alarm limits. Last write wins, no version history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub temperature: f64,
    pub light: f64,
    pub smoke: f64,
    /// Minimum humidity; readings below this count as exceeded
    pub humidity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature: 34.0,
            light: 1500.0,
            smoke: 1000.0,
            humidity: 15.0,
        }
    }
}

/// Operator-facing alert state of the whole system.
///
/// Serialized with the Spanish wire strings the device fleet and the
/// dashboard already speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Normal,
    #[serde(rename = "Riesgo")]
    Risk,
    #[serde(rename = "Confirmado")]
    Confirmed,
}

impl Default for AlertStatus {
    fn default() -> Self {
        AlertStatus::Normal
    }
}

impl AlertStatus {
    /// Parse the persisted wire string, defaulting to Normal
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Riesgo" => AlertStatus::Risk,
            "Confirmado" => AlertStatus::Confirmed,
            _ => AlertStatus::Normal,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            AlertStatus::Normal => "Normal",
            AlertStatus::Risk => "Riesgo",
            AlertStatus::Confirmed => "Confirmado",
        }
    }
}

/// Risk level of a single event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Analyzing,
    Normal,
    Risk,
    Confirmed,
}

impl RiskLevel {
    /// Levels that drive the observability timestamp write
    pub fn is_escalated(&self) -> bool {
        matches!(self, RiskLevel::Risk | RiskLevel::Confirmed)
    }
}

/// Snapshot of the reading that triggered an analysis, frozen into the event.
/// Timestamp is milliseconds since epoch to match the store schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub temperature: f64,
    pub light: f64,
    pub smoke: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub timestamp: i64,
}

impl SensorSnapshot {
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self {
            temperature: reading.temperature,
            light: reading.light,
            smoke: reading.smoke,
            humidity: reading.humidity,
            timestamp: reading.timestamp.timestamp_millis(),
        }
    }
}

/// Normalized AI verdict stored on the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResult {
    pub confidence: f64,
    pub class: String,
    #[serde(default)]
    pub boxes: Vec<serde_json::Value>,
    #[serde(rename = "fireDetected")]
    pub fire_detected: bool,
    /// Set when the inference call failed and the event was finalized anyway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Location descriptor of archived image evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub bucket: String,
    pub key: String,
    pub location: String,
}

/// Well-known latency map keys
pub mod latency_keys {
    pub const BACKEND_RECEIVE_SENSOR: &str = "backend_receive_sensor";
    pub const BACKEND_SEND_JETSON: &str = "backend_send_jetson";
    pub const JETSON_START: &str = "jetson_start";
    pub const JETSON_END: &str = "jetson_end";
    pub const BACKEND_RESPONSE_JETSON: &str = "backend_response_jetson";
    pub const TOTAL_ROUNDTRIP: &str = "total_roundtrip";
}

/// The canonical "Rich Event" record, one per detection cycle.
///
/// `event_id` is the primary identity; the store keeps the latest version
/// per id and emits before/after pairs on its change stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub event_id: String,
    pub device_id: String,
    /// Creation instant, milliseconds since epoch. Immutable.
    pub timestamp: i64,
    pub risk_level: RiskLevel,
    pub sensor_data: SensorSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_result: Option<AiResult>,
    /// Named instants, append-only once set
    #[serde(default)]
    pub latencies: BTreeMap<String, i64>,
    #[serde(default)]
    pub evidence: Option<Evidence>,
    /// ISO rendering of `timestamp` for human queries
    pub formatted_time: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Set once by the change notifier when the record first escalates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_cloud_processed: Option<i64>,
}

impl RiskEvent {
    /// Build the ANALYZING placeholder written before the AI call
    pub fn analyzing(
        event_id: String,
        device_id: String,
        timestamp: i64,
        sensor_data: SensorSnapshot,
    ) -> Self {
        let mut latencies = BTreeMap::new();
        latencies.insert(latency_keys::BACKEND_RECEIVE_SENSOR.to_string(), timestamp);

        Self {
            event_id,
            device_id,
            timestamp,
            risk_level: RiskLevel::Analyzing,
            sensor_data,
            ai_result: None,
            latencies,
            evidence: None,
            formatted_time: format_event_time(timestamp),
            event_type: "fire_analysis_event".to_string(),
            ts_cloud_processed: None,
        }
    }

    /// Low-priority telemetry event synthesized by the reconciliation sync.
    /// The id derives from the local row id so a re-sync overwrites in place.
    pub fn telemetry(local_row_id: i64, device_id: String, sensor_data: SensorSnapshot) -> Self {
        let timestamp = sensor_data.timestamp;
        Self {
            event_id: format!("telemetry-{}", local_row_id),
            device_id,
            timestamp,
            risk_level: RiskLevel::Normal,
            sensor_data,
            ai_result: None,
            latencies: BTreeMap::new(),
            evidence: None,
            formatted_time: format_event_time(timestamp),
            event_type: "sensor_telemetry".to_string(),
            ts_cloud_processed: None,
        }
    }

    /// Record a named instant. Existing keys are kept as-is: latencies are
    /// append-only and never rewritten after being set.
    pub fn record_latency(&mut self, key: &str, instant_ms: i64) {
        self.latencies.entry(key.to_string()).or_insert(instant_ms);
    }
}

fn format_event_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}
