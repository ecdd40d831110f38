//! EventRecordStore - Durable Rich Event Persistence
//!
//! ## Responsibilities
//!
//! - Upsert the canonical RiskEvent record to the store collaborator
//! - Best-effort semantics: store outages never block the ingestion path
//! - Sequential batch push for the reconciliation sync
//!
//! The store provider itself (document database, its query/scan mechanics,
//! its change stream) lives behind the [`EventStore`] trait.

use crate::error::{Error, Result};
use crate::models::RiskEvent;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Durable store collaborator. Writes are keyed by `event_id`, so repeating
/// a put with the same id overwrites the previous version in place.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Write the latest version of an event
    async fn put_event(&self, event: &RiskEvent) -> Result<()>;

    /// Set `ts_cloud_processed` on an existing record without touching
    /// any other attribute
    async fn set_processed_timestamp(&self, event_id: &str, ts_ms: i64) -> Result<()>;
}

/// Best-effort wrapper around the store collaborator.
///
/// Catches and logs all store errors so a persistence outage degrades to
/// "events not archived" instead of failing analyses. Constructed disabled
/// when no store endpoint is configured.
#[derive(Clone)]
pub struct EventRecordStore {
    store: Option<Arc<dyn EventStore>>,
}

impl EventRecordStore {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Store disabled: every upsert becomes a logged no-op
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Upsert one event. Never raises on store errors.
    pub async fn upsert(&self, event: &RiskEvent) {
        let Some(store) = &self.store else {
            tracing::debug!(event_id = %event.event_id, "Event store disabled, skipping upsert");
            return;
        };

        match store.put_event(event).await {
            Ok(()) => {
                tracing::info!(
                    event_id = %event.event_id,
                    risk_level = ?event.risk_level,
                    "Event synced to store"
                );
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to sync event, continuing without persistence"
                );
            }
        }
    }

    /// Push a batch sequentially, one upsert at a time.
    pub async fn upsert_batch(&self, events: &[RiskEvent]) {
        if events.is_empty() {
            return;
        }
        tracing::info!(count = events.len(), "Syncing event batch");
        for event in events {
            self.upsert(event).await;
        }
    }

    /// Observability write used by the change notifier. Errors are the
    /// caller's to log; this write is not on the ingestion path.
    pub async fn set_processed_timestamp(&self, event_id: &str, ts_ms: i64) -> Result<()> {
        match &self.store {
            Some(store) => store.set_processed_timestamp(event_id, ts_ms).await,
            None => Err(Error::Config("event store not configured".to_string())),
        }
    }
}

/// HTTP gateway implementation of [`EventStore`].
///
/// Talks to the cloud store through its document gateway: PUT item and
/// partial-update calls, JSON bodies keyed by table name.
pub struct HttpEventStore {
    http: Client,
    base_url: String,
    table: String,
}

impl HttpEventStore {
    pub fn new(base_url: String, table: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url,
            table,
        }
    }
}

#[async_trait]
impl EventStore for HttpEventStore {
    async fn put_event(&self, event: &RiskEvent) -> Result<()> {
        let url = format!("{}/tables/{}/items", self.base_url, self.table);
        let resp = self
            .http
            .put(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Store(format!("put_event transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "put_event rejected: {} {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn set_processed_timestamp(&self, event_id: &str, ts_ms: i64) -> Result<()> {
        let url = format!(
            "{}/tables/{}/items/{}",
            self.base_url, self.table, event_id
        );
        let resp = self
            .http
            .patch(&url)
            .json(&serde_json::json!({ "ts_cloud_processed": ts_ms }))
            .send()
            .await
            .map_err(|e| Error::Store(format!("set_processed_timestamp transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "set_processed_timestamp rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// In-memory implementation of [`EventStore`], latest version per id.
/// Used by tests and offline development runs.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, RiskEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, event_id: &str) -> Option<RiskEvent> {
        self.events.read().await.get(event_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn all(&self) -> Vec<RiskEvent> {
        self.events.read().await.values().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn put_event(&self, event: &RiskEvent) -> Result<()> {
        self.events
            .write()
            .await
            .insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn set_processed_timestamp(&self, event_id: &str, ts_ms: i64) -> Result<()> {
        let mut events = self.events.write().await;
        match events.get_mut(event_id) {
            Some(event) => {
                event.ts_cloud_processed = Some(ts_ms);
                Ok(())
            }
            None => Err(Error::NotFound(format!("event {}", event_id))),
        }
    }
}
