//! EventLogService - System Event Recording (Ring Buffers)
//!
//! ## Responsibilities
//!
//! - Keep the last N typed system events (threshold hits, analyses, alerts)
//! - Keep the last M request traces recorded by the HTTP middleware
//! - Serve both read-only to the `/logs` and `/connections` endpoints
//!
//! Everything here is process-local and bounded; durable records belong to
//! the event store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default system event capacity
pub const EVENT_CAPACITY: usize = 100;
/// Default request trace capacity
pub const TRACE_CAPACITY: usize = 50;

/// Kind of a system event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sensor,
    Warning,
    Analysis,
    Alert,
    Config,
    Sync,
    Error,
    Info,
}

/// One system event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One traced HTTP request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrace {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Fixed-capacity ring: push drops the oldest entry once full
struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, entry: T) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    fn latest(&self, count: usize) -> Vec<T> {
        self.entries.iter().rev().take(count).cloned().collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    events: RwLock<RingBuffer<SystemEvent>>,
    traces: RwLock<RingBuffer<RequestTrace>>,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(event_capacity: usize, trace_capacity: usize) -> Self {
        Self {
            events: RwLock::new(RingBuffer::new(event_capacity)),
            traces: RwLock::new(RingBuffer::new(trace_capacity)),
        }
    }

    /// Record a system event; also mirrored to tracing
    pub async fn log(&self, kind: EventKind, message: impl Into<String>, data: Option<serde_json::Value>) {
        let message = message.into();
        match kind {
            EventKind::Error => tracing::error!(kind = ?kind, "{}", message),
            EventKind::Warning => tracing::warn!(kind = ?kind, "{}", message),
            _ => tracing::info!(kind = ?kind, "{}", message),
        }

        self.events.write().await.push(SystemEvent {
            timestamp: Utc::now(),
            kind,
            message,
            data,
        });
    }

    /// Record one request trace
    pub async fn trace_request(&self, trace: RequestTrace) {
        self.traces.write().await.push(trace);
    }

    /// All buffered system events, oldest first
    pub async fn events(&self) -> Vec<SystemEvent> {
        self.events.read().await.snapshot()
    }

    /// Latest system events, newest first
    pub async fn latest_events(&self, count: usize) -> Vec<SystemEvent> {
        self.events.read().await.latest(count)
    }

    /// Latest request traces, newest first
    pub async fn latest_traces(&self, count: usize) -> Vec<RequestTrace> {
        self.traces.read().await.latest(count)
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY, TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_ring_is_bounded() {
        let log = EventLogService::new(3, 3);
        for i in 0..5 {
            log.log(EventKind::Info, format!("event {}", i), None).await;
        }

        let events = log.events().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 2");
        assert_eq!(events[2].message, "event 4");
    }

    #[tokio::test]
    async fn test_latest_returns_newest_first() {
        let log = EventLogService::default();
        log.log(EventKind::Sensor, "first", None).await;
        log.log(EventKind::Alert, "second", None).await;

        let latest = log.latest_events(1).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].message, "second");
    }

    #[tokio::test]
    async fn test_trace_ring_is_bounded() {
        let log = EventLogService::new(10, 2);
        for i in 0..4 {
            log.trace_request(RequestTrace {
                timestamp: Utc::now(),
                method: "GET".to_string(),
                path: format!("/p{}", i),
                remote_addr: None,
                user_agent: None,
            })
            .await;
        }

        let traces = log.latest_traces(10).await;
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].path, "/p3");
    }
}
