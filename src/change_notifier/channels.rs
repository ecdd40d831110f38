//! Outbound notification transports
//!
//! Three independent channel families: a broadcast topic (email/SMS
//! subscribers managed by the provider), a chat bot send-message API, and a
//! per-number message gateway for SMS/WhatsApp contacts. Each transport is a
//! trait so the notifier can be exercised with recording fakes.

use crate::contacts::ContactType;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Broadcast topic publisher (group notification service)
#[async_trait]
pub trait BroadcastPublisher: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<()>;
}

/// Chat bot send-message API
#[async_trait]
pub trait ChatBot: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Per-number direct message gateway (SMS/WhatsApp transports)
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(&self, contact_type: ContactType, to: &str, text: &str) -> Result<()>;
}

/// HTTP implementation of [`BroadcastPublisher`]: one POST per publish,
/// topic configured once at startup.
pub struct HttpBroadcastPublisher {
    http: Client,
    publish_url: String,
    topic: String,
}

impl HttpBroadcastPublisher {
    pub fn new(publish_url: String, topic: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            publish_url,
            topic,
        }
    }
}

#[async_trait]
impl BroadcastPublisher for HttpBroadcastPublisher {
    async fn publish(&self, subject: &str, message: &str) -> Result<()> {
        let resp = self
            .http
            .post(&self.publish_url)
            .json(&serde_json::json!({
                "topic": self.topic,
                "subject": subject,
                "message": message,
            }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("broadcast transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Notification(format!(
                "broadcast rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Telegram-style bot API client
pub struct TelegramBot {
    http: Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramBot {
    pub fn new(token: String) -> Self {
        Self::with_api_base("https://api.telegram.org".to_string(), token)
    }

    /// Custom API base, used by tests pointing at a local stub
    pub fn with_api_base(api_base: String, token: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            api_base,
            token,
        }
    }
}

#[async_trait]
impl ChatBot for TelegramBot {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("chat transport: {}", e)))?;

        let body: TelegramResponse = resp
            .json()
            .await
            .map_err(|e| Error::Notification(format!("chat response decode: {}", e)))?;

        if !body.ok {
            return Err(Error::Notification(format!(
                "chat API error: {}",
                body.description.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        Ok(())
    }
}

/// HTTP implementation of [`MessageGateway`]
pub struct HttpMessageGateway {
    http: Client,
    send_url: String,
}

impl HttpMessageGateway {
    pub fn new(send_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self { http, send_url }
    }
}

#[async_trait]
impl MessageGateway for HttpMessageGateway {
    async fn send(&self, contact_type: ContactType, to: &str, text: &str) -> Result<()> {
        let channel = match contact_type {
            ContactType::Sms => "sms",
            ContactType::Whatsapp => "whatsapp",
            other => {
                return Err(Error::Notification(format!(
                    "gateway does not carry {:?} messages",
                    other
                )))
            }
        };

        let resp = self
            .http
            .post(&self.send_url)
            .json(&serde_json::json!({
                "channel": channel,
                "to": to,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("gateway transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Notification(format!(
                "gateway rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
