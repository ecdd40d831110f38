//! RealtimeHub - Live Observer Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management for dashboard observers
//! - Broadcasting sensor readings, alert status changes and analysis results
//!
//! Observers are read-only; the hub never feeds anything back into the
//! pipeline. Dropped send errors only mean a client went away mid-write.

use crate::models::{AiResult, AlertStatus, SensorReading};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "camelCase")]
pub enum HubMessage {
    /// Latest reading from the device
    SensorData(SensorReading),
    /// System-wide alert status change
    AlertStatus(AlertStatus),
    /// Normalized AI verdict for a finished analysis
    AnalysisResult(AnalysisResultMessage),
}

/// Analysis result message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResultMessage {
    pub event_id: String,
    pub result: AiResult,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new observer
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = %id, "Observer connected");

        (id, rx)
    }

    /// Unregister an observer
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Observer disconnected");
        }
    }

    /// Broadcast message to all observers
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send to observer");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
