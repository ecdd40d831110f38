//! ReconciliationSync - Periodic Cloud Backfill
//!
//! ## Responsibilities
//!
//! - Push locally created contacts that never reached the cloud directory
//! - Replay buffered sensor readings as low-priority telemetry events
//! - Advance the `last_cloud_sync` cursor only after a batch lands
//!
//! One loop, non-overlapping by construction: the next tick is only
//! awaited after the previous cycle finishes. A crash mid-batch re-syncs
//! the whole batch next cycle; telemetry event ids derive from local row
//! ids, so the replay overwrites in place.

use crate::contacts::ContactDirectory;
use crate::error::Result;
use crate::event_store::EventRecordStore;
use crate::local_buffer::{BufferedReading, LocalBuffer};
use crate::models::{RiskEvent, SensorSnapshot};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Default cycle interval
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Cursor default when the process has never synced: one hour back
const DEFAULT_LOOKBACK_MS: i64 = 60 * 60 * 1000;

/// Outcome counters of one cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub contacts_pushed: usize,
    pub events_pushed: usize,
    /// New cursor value, None when the cycle moved nothing
    pub cursor: Option<i64>,
}

/// ReconciliationSync instance
pub struct ReconciliationSync {
    buffer: LocalBuffer,
    record_store: EventRecordStore,
    contacts: Option<Arc<dyn ContactDirectory>>,
    device_id: String,
    interval: Duration,
}

impl ReconciliationSync {
    pub fn new(
        buffer: LocalBuffer,
        record_store: EventRecordStore,
        device_id: String,
    ) -> Self {
        Self {
            buffer,
            record_store,
            contacts: None,
            device_id,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactDirectory>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the periodic loop as a background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                "Starting reconciliation sync scheduler"
            );

            let mut ticker = tokio::time::interval(self.interval);
            // First tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.run_cycle().await {
                    Ok(report) => {
                        tracing::info!(
                            contacts = report.contacts_pushed,
                            events = report.events_pushed,
                            cursor = ?report.cursor,
                            "Sync cycle finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Sync cycle failed, will retry next tick");
                    }
                }
            }
        })
    }

    /// Run one full cycle: contacts first, then buffered readings.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        report.contacts_pushed = self.push_pending_contacts().await?;

        let cursor = match self.buffer.last_cloud_sync().await? {
            Some(ts) => ts,
            None => Utc::now().timestamp_millis() - DEFAULT_LOOKBACK_MS,
        };

        let rows = self.buffer.readings_since(cursor).await?;
        if rows.is_empty() {
            tracing::debug!(cursor, "No buffered readings to sync");
            return Ok(report);
        }

        let last_timestamp = rows.last().map(|r| r.timestamp);
        let events: Vec<RiskEvent> = rows
            .into_iter()
            .map(|row| telemetry_event(&self.device_id, row))
            .collect();

        report.events_pushed = events.len();
        self.record_store.upsert_batch(&events).await;

        // Cursor moves only after the whole batch went through
        if let Some(ts) = last_timestamp {
            self.buffer.set_last_cloud_sync(ts).await?;
            report.cursor = Some(ts);
        }

        Ok(report)
    }

    /// Push each unsynced contact individually so one bad record never
    /// blocks the rest.
    async fn push_pending_contacts(&self) -> Result<usize> {
        let Some(directory) = &self.contacts else {
            return Ok(0);
        };

        let pending = self.buffer.unsynced_contacts().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = pending.len(), "Pushing locally created contacts");
        let mut pushed = 0;
        for contact in pending {
            match directory.put_contact(&contact).await {
                Ok(()) => {
                    self.buffer.mark_contact_synced(&contact.contact_id).await?;
                    pushed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        contact_id = %contact.contact_id,
                        error = %e,
                        "Contact push failed, kept for next cycle"
                    );
                }
            }
        }
        Ok(pushed)
    }
}

fn telemetry_event(device_id: &str, row: BufferedReading) -> RiskEvent {
    RiskEvent::telemetry(
        row.id,
        device_id.to_string(),
        SensorSnapshot {
            temperature: row.temperature,
            light: row.light,
            smoke: row.smoke,
            humidity: row.humidity,
            timestamp: row.timestamp,
        },
    )
}
