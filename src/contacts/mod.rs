//! Contacts - Alert Recipient Directory
//!
//! ## Responsibilities
//!
//! - Contact model shared by the CRUD API and the change notifier
//! - Directory collaborator trait over the cloud contacts table
//!
//! Contacts are managed independently of the detection pipeline and
//! consumed read-only by the notifier at fan-out time.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Dispatch channel of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    Email,
    Sms,
    Whatsapp,
    Telegram,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Email => "email",
            ContactType::Sms => "sms",
            ContactType::Whatsapp => "whatsapp",
            ContactType::Telegram => "telegram",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(ContactType::Email),
            "sms" => Some(ContactType::Sms),
            "whatsapp" => Some(ContactType::Whatsapp),
            "telegram" => Some(ContactType::Telegram),
            _ => None,
        }
    }
}

/// One alert recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: String,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub value: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a contact
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContactRequest {
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub value: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for updating a contact; absent fields stay unchanged
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateContactRequest {
    #[serde(rename = "type", default)]
    pub contact_type: Option<ContactType>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Contact {
    pub fn from_request(req: CreateContactRequest) -> Self {
        Self {
            contact_id: Uuid::new_v4().to_string(),
            contact_type: req.contact_type,
            value: req.value,
            name: req.name.unwrap_or_else(|| "Unknown".to_string()),
            created_at: Utc::now(),
        }
    }
}

/// Cloud contacts directory collaborator
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Upsert a contact (keyed by contact_id)
    async fn put_contact(&self, contact: &Contact) -> Result<()>;

    /// All contacts; an unreachable directory yields an error, the notifier
    /// downgrades that to "no dynamic recipients"
    async fn list_contacts(&self) -> Result<Vec<Contact>>;

    async fn update_contact(&self, contact_id: &str, update: &UpdateContactRequest) -> Result<()>;

    async fn delete_contact(&self, contact_id: &str) -> Result<()>;
}

/// HTTP gateway implementation of [`ContactDirectory`]
pub struct HttpContactDirectory {
    http: Client,
    base_url: String,
    table: String,
}

impl HttpContactDirectory {
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

    fn items_url(&self) -> String {
        format!("{}/tables/{}/items", self.base_url, self.table)
    }
}

#[async_trait]
impl ContactDirectory for HttpContactDirectory {
    async fn put_contact(&self, contact: &Contact) -> Result<()> {
        let resp = self
            .http
            .put(self.items_url())
            .json(contact)
            .send()
            .await
            .map_err(|e| Error::Store(format!("put_contact transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!("put_contact rejected: {}", resp.status())));
        }
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let resp = self
            .http
            .get(self.items_url())
            .send()
            .await
            .map_err(|e| Error::Store(format!("list_contacts transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "list_contacts rejected: {}",
                resp.status()
            )));
        }

        let contacts: Vec<Contact> = resp
            .json()
            .await
            .map_err(|e| Error::Store(format!("list_contacts decode: {}", e)))?;
        Ok(contacts)
    }

    async fn update_contact(&self, contact_id: &str, update: &UpdateContactRequest) -> Result<()> {
        let url = format!("{}/{}", self.items_url(), contact_id);
        let mut patch = serde_json::Map::new();
        if let Some(t) = &update.contact_type {
            patch.insert("type".to_string(), serde_json::to_value(t)?);
        }
        if let Some(v) = &update.value {
            patch.insert("value".to_string(), serde_json::Value::String(v.clone()));
        }
        if let Some(n) = &update.name {
            patch.insert("name".to_string(), serde_json::Value::String(n.clone()));
        }

        let resp = self
            .http
            .patch(&url)
            .json(&patch)
            .send()
            .await
            .map_err(|e| Error::Store(format!("update_contact transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "update_contact rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete_contact(&self, contact_id: &str) -> Result<()> {
        let url = format!("{}/{}", self.items_url(), contact_id);
        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::Store(format!("delete_contact transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "delete_contact rejected: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// In-memory implementation of [`ContactDirectory`] for tests and offline runs
#[derive(Default)]
pub struct MemoryContactDirectory {
    contacts: RwLock<HashMap<String, Contact>>,
}

impl MemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactDirectory for MemoryContactDirectory {
    async fn put_contact(&self, contact: &Contact) -> Result<()> {
        self.contacts
            .write()
            .await
            .insert(contact.contact_id.clone(), contact.clone());
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self.contacts.read().await.values().cloned().collect();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(contacts)
    }

    async fn update_contact(&self, contact_id: &str, update: &UpdateContactRequest) -> Result<()> {
        let mut contacts = self.contacts.write().await;
        let contact = contacts
            .get_mut(contact_id)
            .ok_or_else(|| Error::NotFound(format!("contact {}", contact_id)))?;

        if let Some(t) = update.contact_type {
            contact.contact_type = t;
        }
        if let Some(v) = &update.value {
            contact.value = v.clone();
        }
        if let Some(n) = &update.name {
            contact.name = n.clone();
        }
        Ok(())
    }

    async fn delete_contact(&self, contact_id: &str) -> Result<()> {
        self.contacts
            .write()
            .await
            .remove(contact_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("contact {}", contact_id)))
    }
}
