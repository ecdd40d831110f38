//! LocalBuffer - SQLite Persistence Layer
//!
//! ## Responsibilities
//!
//! - Buffer every accepted sensor reading for later reconciliation
//! - Persist thresholds, the sync cursor and the last alert status across
//!   restarts
//! - Hold locally created contacts until the sync loop pushes them
//!
//! Writes from the ingestion path are best-effort at the call site; this
//! layer itself propagates errors and lets callers decide.

use crate::error::{Error, Result};
use crate::models::{AlertStatus, SensorReading, Thresholds};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::contacts::{Contact, ContactType};

/// Config keys stored in the `config` KV table
mod config_keys {
    pub const THRESHOLD_TEMPERATURE: &str = "threshold_temperature";
    pub const THRESHOLD_LIGHT: &str = "threshold_light";
    pub const THRESHOLD_SMOKE: &str = "threshold_smoke";
    pub const THRESHOLD_HUMIDITY: &str = "threshold_humidity";
    pub const LAST_CLOUD_SYNC: &str = "last_cloud_sync";
    pub const LAST_ALERT_STATUS: &str = "last_alert_status";
}

/// One buffered reading row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BufferedReading {
    pub id: i64,
    pub device_id: String,
    pub temperature: f64,
    pub light: f64,
    pub smoke: f64,
    pub humidity: Option<f64>,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub alert_status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ContactRow {
    contact_id: String,
    contact_type: String,
    value: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl ContactRow {
    fn into_contact(self) -> Result<Contact> {
        let contact_type = ContactType::from_str_loose(&self.contact_type).ok_or_else(|| {
            Error::Validation(format!("unknown contact type: {}", self.contact_type))
        })?;
        Ok(Contact {
            contact_id: self.contact_id,
            contact_type,
            value: self.value,
            name: self.name,
            created_at: self.created_at,
        })
    }
}

/// LocalBuffer repository for database operations
#[derive(Clone)]
pub struct LocalBuffer {
    pool: SqlitePool,
}

impl LocalBuffer {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables when missing. Called once at startup.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                temperature REAL NOT NULL,
                light REAL NOT NULL,
                smoke REAL NOT NULL,
                humidity REAL,
                timestamp INTEGER NOT NULL,
                alert_status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                contact_id TEXT PRIMARY KEY,
                contact_type TEXT NOT NULL,
                value TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sensor_data_timestamp ON sensor_data(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Local buffer schema ready");
        Ok(())
    }

    // ========================================
    // Sensor readings
    // ========================================

    /// Insert one reading, returning its row id
    pub async fn insert_reading(
        &self,
        device_id: &str,
        reading: &SensorReading,
        alert_status: AlertStatus,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_data (device_id, temperature, light, smoke, humidity, timestamp, alert_status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(reading.temperature)
        .bind(reading.light)
        .bind(reading.smoke)
        .bind(reading.humidity)
        .bind(reading.timestamp.timestamp_millis())
        .bind(alert_status.as_wire())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent reading, used to rebuild state at startup
    pub async fn latest_reading(&self) -> Result<Option<BufferedReading>> {
        let row = sqlx::query_as::<_, BufferedReading>(
            r#"
            SELECT id, device_id, temperature, light, smoke, humidity, timestamp, alert_status
            FROM sensor_data
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Readings at or after `since_ms`, oldest first
    pub async fn readings_since(&self, since_ms: i64) -> Result<Vec<BufferedReading>> {
        let rows = sqlx::query_as::<_, BufferedReading>(
            r#"
            SELECT id, device_id, temperature, light, smoke, humidity, timestamp, alert_status
            FROM sensor_data
            WHERE timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ========================================
    // Config KV
    // ========================================

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.map(|(v,)| v))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load persisted thresholds; None when never saved
    pub async fn load_thresholds(&self) -> Result<Option<Thresholds>> {
        let temperature = self.get_config_f64(config_keys::THRESHOLD_TEMPERATURE).await?;
        let light = self.get_config_f64(config_keys::THRESHOLD_LIGHT).await?;
        let smoke = self.get_config_f64(config_keys::THRESHOLD_SMOKE).await?;
        let humidity = self.get_config_f64(config_keys::THRESHOLD_HUMIDITY).await?;

        match (temperature, light, smoke, humidity) {
            (Some(temperature), Some(light), Some(smoke), Some(humidity)) => Ok(Some(Thresholds {
                temperature,
                light,
                smoke,
                humidity,
            })),
            _ => Ok(None),
        }
    }

    pub async fn save_thresholds(&self, thresholds: &Thresholds) -> Result<()> {
        self.set_config(
            config_keys::THRESHOLD_TEMPERATURE,
            &thresholds.temperature.to_string(),
        )
        .await?;
        self.set_config(config_keys::THRESHOLD_LIGHT, &thresholds.light.to_string())
            .await?;
        self.set_config(config_keys::THRESHOLD_SMOKE, &thresholds.smoke.to_string())
            .await?;
        self.set_config(
            config_keys::THRESHOLD_HUMIDITY,
            &thresholds.humidity.to_string(),
        )
        .await?;
        Ok(())
    }

    /// Reconciliation cursor in epoch milliseconds
    pub async fn last_cloud_sync(&self) -> Result<Option<i64>> {
        let value = self.get_config(config_keys::LAST_CLOUD_SYNC).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub async fn set_last_cloud_sync(&self, ts_ms: i64) -> Result<()> {
        self.set_config(config_keys::LAST_CLOUD_SYNC, &ts_ms.to_string())
            .await
    }

    pub async fn last_alert_status(&self) -> Result<Option<AlertStatus>> {
        let value = self.get_config(config_keys::LAST_ALERT_STATUS).await?;
        Ok(value.map(|v| AlertStatus::from_wire(&v)))
    }

    pub async fn set_last_alert_status(&self, status: AlertStatus) -> Result<()> {
        self.set_config(config_keys::LAST_ALERT_STATUS, status.as_wire())
            .await
    }

    async fn get_config_f64(&self, key: &str) -> Result<Option<f64>> {
        let value = self.get_config(key).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    // ========================================
    // Contacts mirror
    // ========================================

    /// Mirror a locally created contact, pending cloud sync
    pub async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (contact_id, contact_type, value, name, created_at, synced)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(contact_id) DO UPDATE SET
                contact_type = excluded.contact_type,
                value = excluded.value,
                name = excluded.name
            "#,
        )
        .bind(&contact.contact_id)
        .bind(contact.contact_type.as_str())
        .bind(&contact.value)
        .bind(&contact.name)
        .bind(contact.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Contacts not yet pushed to the cloud directory
    pub async fn unsynced_contacts(&self) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT contact_id, contact_type, value, name, created_at
            FROM contacts
            WHERE synced = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContactRow::into_contact).collect()
    }

    pub async fn mark_contact_synced(&self, contact_id: &str) -> Result<()> {
        sqlx::query("UPDATE contacts SET synced = 1 WHERE contact_id = ?")
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_contact(&self, contact_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM contacts WHERE contact_id = ?")
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
