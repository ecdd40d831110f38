//! ChangeNotifier - Risk Transitions from Record Diffs
//!
//! ## Responsibilities
//!
//! - Consume before/after record pairs from the store's change stream
//! - Derive risk transitions and fire each side effect exactly once
//! - Fan out human alerts across broadcast, chat bot and dynamic contacts
//!
//! ## Correctness rules
//!
//! - `ts_cloud_processed` is written once per record: only when the new
//!   version is RISK or CONFIRMED and the field is not already set. A
//!   re-delivered record therefore never re-triggers the write.
//! - Alerts fan out only on the first entry into CONFIRMED
//!   (`new == CONFIRMED && old != CONFIRMED`). RISK never fans out.
//! - Every destination is "send and log": one channel failing never stops
//!   delivery to the rest.

mod channels;
mod decode;

pub use channels::{
    BroadcastPublisher, ChatBot, HttpBroadcastPublisher, HttpMessageGateway, MessageGateway,
    TelegramBot,
};
pub use decode::{decode_image, AttrValue};

use crate::contacts::{ContactDirectory, ContactType};
use crate::event_store::EventRecordStore;
use crate::models::RiskLevel;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One change-stream record as delivered by the store provider.
/// Extra fields on the wire are ignored.
#[derive(Debug, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(rename = "dynamodb", default)]
    pub images: Option<StreamImages>,
}

/// Before/after attribute images of one write. Attributes stay raw JSON
/// here so a provider type this decoder doesn't model never rejects the
/// batch at the serde boundary; [`decode_image`] handles them per attribute.
#[derive(Debug, Default, Deserialize)]
pub struct StreamImages {
    #[serde(rename = "NewImage", default)]
    pub new_image: Option<BTreeMap<String, Value>>,
    #[serde(rename = "OldImage", default)]
    pub old_image: Option<BTreeMap<String, Value>>,
}

/// A batch of stream records
#[derive(Debug, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

/// Counters for one processed batch, used by handlers and tests
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct NotifySummary {
    pub records: usize,
    pub fanned_out: usize,
    pub dispatched: usize,
    pub timestamps_set: usize,
}

/// ChangeNotifier instance
pub struct ChangeNotifier {
    record_store: EventRecordStore,
    contacts: Option<Arc<dyn ContactDirectory>>,
    broadcast: Option<Arc<dyn BroadcastPublisher>>,
    chat_bot: Option<Arc<dyn ChatBot>>,
    static_chat_id: Option<String>,
    gateway: Option<Arc<dyn MessageGateway>>,
    // Event ids already fanned out, so an exact re-delivery of the same
    // (old, new) pair alerts only once. Bounded: oldest ids age out.
    alerted: Mutex<AlertedSet>,
}

/// Bound on the fan-out dedup set; re-deliveries arrive close to the
/// original write, so aged-out ids are long past their stream retention.
const ALERTED_CAPACITY: usize = 1024;

/// Insertion-ordered set with a fixed capacity
struct AlertedSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AlertedSet {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns false when the id was already present
    fn insert(&mut self, id: String) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

impl ChangeNotifier {
    /// Create a notifier with every channel unconfigured
    pub fn new(record_store: EventRecordStore) -> Self {
        Self {
            record_store,
            contacts: None,
            broadcast: None,
            chat_bot: None,
            static_chat_id: None,
            gateway: None,
            alerted: Mutex::new(AlertedSet::new(ALERTED_CAPACITY)),
        }
    }

    pub fn with_broadcast(mut self, broadcast: Arc<dyn BroadcastPublisher>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn with_chat_bot(mut self, bot: Arc<dyn ChatBot>, static_chat_id: Option<String>) -> Self {
        self.chat_bot = Some(bot);
        self.static_chat_id = static_chat_id;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn MessageGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactDirectory>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Log which channels are live. Unconfigured channels stay silently
    /// disabled for the life of the process.
    pub fn log_channel_status(&self) {
        if self.broadcast.is_none() {
            tracing::warn!("Broadcast topic not configured, broadcast alerts disabled");
        }
        if self.chat_bot.is_none() {
            tracing::warn!("Chat bot not configured, chat alerts disabled");
        }
        if self.gateway.is_none() {
            tracing::warn!("Message gateway not configured, SMS/WhatsApp alerts disabled");
        }
        if self.contacts.is_none() {
            tracing::warn!("Contact directory not configured, dynamic recipients disabled");
        }
    }

    /// Process one batch of stream records, in arrival order.
    pub async fn process_batch(&self, batch: StreamBatch) -> NotifySummary {
        let mut summary = NotifySummary::default();

        for record in batch.records {
            if record.event_name != "INSERT" && record.event_name != "MODIFY" {
                tracing::debug!(event_name = %record.event_name, "Ignoring stream record");
                continue;
            }

            let Some(images) = record.images else {
                tracing::warn!("Stream record without images, skipping");
                continue;
            };
            let Some(new_image) = images.new_image else {
                tracing::warn!("Stream record without NewImage, skipping");
                continue;
            };

            let new = decode_image(new_image);
            let old = images.old_image.map(decode_image);
            summary.records += 1;

            self.process_record(&new, old.as_ref(), &mut summary).await;
        }

        summary
    }

    async fn process_record(
        &self,
        new: &Map<String, Value>,
        old: Option<&Map<String, Value>>,
        summary: &mut NotifySummary,
    ) {
        let event_id = match new.get("event_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("Stream record without event_id, skipping");
                return;
            }
        };

        let new_level = risk_level_of(Some(new));
        let old_level = risk_level_of(old);

        tracing::info!(
            event_id = %event_id,
            old_level = ?old_level,
            new_level = ?new_level,
            "Processing change record"
        );

        // Escalation observability write, guarded by presence of the field
        // so duplicate deliveries cannot re-trigger it.
        if matches!(new_level, Some(l) if l.is_escalated()) && !new.contains_key("ts_cloud_processed")
        {
            let now_ms = Utc::now().timestamp_millis();
            match self.record_store.set_processed_timestamp(&event_id, now_ms).await {
                Ok(()) => {
                    summary.timestamps_set += 1;
                    tracing::debug!(event_id = %event_id, "ts_cloud_processed set");
                }
                Err(e) => {
                    tracing::error!(event_id = %event_id, error = %e, "Failed to set ts_cloud_processed");
                }
            }
        }

        // Alert fan-out only on the first entry into CONFIRMED.
        if new_level == Some(RiskLevel::Confirmed) && old_level != Some(RiskLevel::Confirmed) {
            if !self.alerted.lock().await.insert(event_id.clone()) {
                tracing::info!(event_id = %event_id, "Duplicate stream delivery, alert already sent");
                return;
            }
            summary.fanned_out += 1;
            summary.dispatched += self.fan_out(&event_id, new).await;
        }
    }

    /// Dispatch one confirmed-fire alert to every configured destination.
    /// Returns the number of successful dispatches.
    async fn fan_out(&self, event_id: &str, record: &Map<String, Value>) -> usize {
        let message = compose_alert(event_id, record);
        let mut dispatched = 0;

        tracing::warn!(event_id = %event_id, "Confirmed fire, fanning out alerts");

        if let Some(broadcast) = &self.broadcast {
            match broadcast.publish("ALERTA DE FUEGO DETECTADO", &message).await {
                Ok(()) => {
                    dispatched += 1;
                    tracing::info!(event_id = %event_id, "Broadcast alert published");
                }
                Err(e) => {
                    tracing::error!(event_id = %event_id, error = %e, "Broadcast publish failed");
                }
            }
        }

        if let (Some(bot), Some(chat_id)) = (&self.chat_bot, &self.static_chat_id) {
            match bot.send_message(chat_id, &message).await {
                Ok(()) => {
                    dispatched += 1;
                    tracing::info!(event_id = %event_id, chat_id = %chat_id, "Chat alert sent");
                }
                Err(e) => {
                    tracing::error!(event_id = %event_id, error = %e, "Chat alert failed");
                }
            }
        }

        dispatched += self.dispatch_contacts(event_id, &message).await;
        dispatched
    }

    async fn dispatch_contacts(&self, event_id: &str, message: &str) -> usize {
        let Some(directory) = &self.contacts else {
            return 0;
        };

        let contacts = match directory.list_contacts().await {
            Ok(contacts) => contacts,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Could not fetch contacts");
                return 0;
            }
        };

        tracing::info!(event_id = %event_id, count = contacts.len(), "Dispatching to dynamic contacts");

        let mut dispatched = 0;
        for contact in contacts {
            let result = match contact.contact_type {
                ContactType::Email => {
                    // Email recipients are carried by the broadcast topic's
                    // subscriptions; nothing to send directly.
                    tracing::info!(
                        event_id = %event_id,
                        value = %contact.value,
                        "Email contact handled via broadcast subscription"
                    );
                    continue;
                }
                ContactType::Telegram => match &self.chat_bot {
                    Some(bot) => bot.send_message(&contact.value, message).await,
                    None => continue,
                },
                ContactType::Sms | ContactType::Whatsapp => match &self.gateway {
                    Some(gateway) => {
                        gateway.send(contact.contact_type, &contact.value, message).await
                    }
                    None => continue,
                },
            };

            match result {
                Ok(()) => {
                    dispatched += 1;
                    tracing::info!(
                        event_id = %event_id,
                        contact_id = %contact.contact_id,
                        contact_type = ?contact.contact_type,
                        "Contact alert sent"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %event_id,
                        contact_id = %contact.contact_id,
                        error = %e,
                        "Contact alert failed"
                    );
                }
            }
        }

        dispatched
    }
}

fn risk_level_of(image: Option<&Map<String, Value>>) -> Option<RiskLevel> {
    image
        .and_then(|m| m.get("risk_level"))
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
}

/// Compose the single human-readable alert message
fn compose_alert(event_id: &str, record: &Map<String, Value>) -> String {
    let device_id = record
        .get("device_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let confidence = record
        .get("ai_result")
        .and_then(|r| r.get("confidence"))
        .and_then(Value::as_f64)
        .map(|c| format!("{:.1}%", c * 100.0))
        .unwrap_or_else(|| "N/A".to_string());

    let time = record
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    let evidence = record
        .get("evidence")
        .and_then(|e| e.get("location"))
        .and_then(Value::as_str)
        .unwrap_or("No evidence");

    format!(
        "🔥 FUEGO CONFIRMADO\n\nID: {}\nDevice: {}\nConfianza: {}\nHora: {}\n\nEvidencia: {}\n\nAcción requerida inmediata.",
        event_id, device_id, confidence, time, evidence
    )
}
