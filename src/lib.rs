//! Fire ID backend
//!
//! Sensor ingestion, threshold-gated single-flight AI analysis, durable
//! risk events, change-stream alert fan-out, and periodic reconciliation
//! of the local buffer with the cloud store.

pub mod ai_client;
pub mod analysis;
pub mod change_notifier;
pub mod contacts;
pub mod error;
pub mod event_log_service;
pub mod event_store;
pub mod evidence;
pub mod local_buffer;
pub mod models;
pub mod realtime_hub;
pub mod state;
pub mod sync_service;
pub mod threshold;
pub mod web_api;

pub use error::{Error, Result};
