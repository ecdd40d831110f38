//! Analysis - Single-Flight AI Orchestration
//!
//! ## Responsibilities
//!
//! - Admission gate: at most one AI analysis in flight per process
//! - Orchestrate one detection cycle: placeholder write, inference call,
//!   classification, evidence archiving, final event write
//! - Broadcast progress to realtime observers
//!
//! ## Protocol
//!
//! acquire gate -> fresh event_id -> write ANALYZING placeholder ->
//! call AI (15 s budget) -> classify -> archive evidence (non-fatal) ->
//! write finalized event -> release gate.
//!
//! The gate permit is RAII: it releases on every exit path, including
//! inference errors and panics unwinding through the orchestration.

use crate::ai_client::{AiClient, AnalyzeRequest, AnalyzeResponse};
use crate::error::Result;
use crate::event_log_service::{EventKind, EventLogService};
use crate::event_store::EventRecordStore;
use crate::evidence::EvidenceArchiver;
use crate::models::{
    latency_keys, AiResult, AlertStatus, RiskEvent, RiskLevel, SensorReading, SensorSnapshot,
};
use crate::realtime_hub::{AnalysisResultMessage, HubMessage, RealtimeHub};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Confidence above which a detected fire is CONFIRMED rather than RISK
pub const CONFIRM_CONFIDENCE: f64 = 0.7;

/// Single-flight admission gate
#[derive(Default)]
pub struct AnalysisGate {
    busy: AtomicBool,
}

impl AnalysisGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the gate. Returns `None` when an analysis is already
    /// in flight; the caller drops the reading with a log line.
    pub fn try_acquire(&self) -> Option<AnalysisPermit<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(AnalysisPermit { gate: self })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held while an analysis runs; releases the gate on drop
pub struct AnalysisPermit<'a> {
    gate: &'a AnalysisGate,
}

impl Drop for AnalysisPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Outcome of one completed orchestration
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub event_id: String,
    pub risk_level: RiskLevel,
    pub alert_status: AlertStatus,
}

/// AnalysisOrchestrator instance
pub struct AnalysisOrchestrator {
    gate: AnalysisGate,
    ai_client: AiClient,
    record_store: EventRecordStore,
    archiver: EvidenceArchiver,
    hub: Arc<RealtimeHub>,
    event_log: Arc<EventLogService>,
    device_id: String,
    rtsp_url: Option<String>,
}

impl AnalysisOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ai_client: AiClient,
        record_store: EventRecordStore,
        archiver: EvidenceArchiver,
        hub: Arc<RealtimeHub>,
        event_log: Arc<EventLogService>,
        device_id: String,
        rtsp_url: Option<String>,
    ) -> Self {
        Self {
            gate: AnalysisGate::new(),
            ai_client,
            record_store,
            archiver,
            hub,
            event_log,
            device_id,
            rtsp_url,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Run one detection cycle. Returns `Ok(None)` when the gate is held;
    /// the contended reading is dropped, never queued.
    pub async fn run_analysis(
        &self,
        reading: SensorReading,
        image_base64: Option<String>,
    ) -> Result<Option<AnalysisOutcome>> {
        let Some(permit) = self.gate.try_acquire() else {
            tracing::info!("Analysis already in flight, dropping reading");
            self.event_log
                .log(
                    EventKind::Warning,
                    "Analysis in flight, reading dropped",
                    None,
                )
                .await;
            return Ok(None);
        };

        let event_id = Uuid::new_v4().to_string();
        let received_ms = reading.timestamp.timestamp_millis();

        tracing::info!(event_id = %event_id, "Starting fire analysis");
        self.event_log
            .log(
                EventKind::Analysis,
                "Analysis started",
                Some(serde_json::json!({ "event_id": event_id })),
            )
            .await;

        let mut event = RiskEvent::analyzing(
            event_id.clone(),
            self.device_id.clone(),
            received_ms,
            SensorSnapshot::from_reading(&reading),
        );

        // Placeholder so observers see the event while inference runs
        self.record_store.upsert(&event).await;

        event.record_latency(latency_keys::BACKEND_SEND_JETSON, Utc::now().timestamp_millis());
        let request = AnalyzeRequest {
            event_id: event_id.clone(),
            rtsp_url: self.rtsp_url.clone(),
            image_base64,
            sensors: reading,
            include_image: true,
            timestamps: event.latencies.clone(),
        };

        let outcome = match self.ai_client.analyze(&request).await {
            Ok(response) => self.finalize_verdict(&mut event, response).await,
            Err(e) => {
                // Placeholder is never left stuck at ANALYZING: a failed
                // inference finalizes to NORMAL with the error on record.
                tracing::error!(event_id = %event_id, error = %e, "Inference failed, finalizing as NORMAL");
                event.risk_level = RiskLevel::Normal;
                event.ai_result = Some(AiResult {
                    confidence: 0.0,
                    class: "error".to_string(),
                    boxes: Vec::new(),
                    fire_detected: false,
                    error: Some(e.to_string()),
                });
                self.event_log
                    .log(
                        EventKind::Error,
                        format!("Inference failed: {}", e),
                        Some(serde_json::json!({ "event_id": event_id })),
                    )
                    .await;
                AnalysisOutcome {
                    event_id: event_id.clone(),
                    risk_level: RiskLevel::Normal,
                    alert_status: AlertStatus::Normal,
                }
            }
        };

        event.record_latency(latency_keys::TOTAL_ROUNDTRIP, Utc::now().timestamp_millis());
        self.record_store.upsert(&event).await;

        if let Some(result) = &event.ai_result {
            self.hub
                .broadcast(HubMessage::AnalysisResult(AnalysisResultMessage {
                    event_id: event_id.clone(),
                    result: result.clone(),
                }))
                .await;
        }

        tracing::info!(
            event_id = %event_id,
            risk_level = ?outcome.risk_level,
            "Analysis finished"
        );

        drop(permit);
        Ok(Some(outcome))
    }

    /// Apply the classification rule and archive evidence for a successful
    /// inference response.
    async fn finalize_verdict(
        &self,
        event: &mut RiskEvent,
        response: AnalyzeResponse,
    ) -> AnalysisOutcome {
        let now_ms = Utc::now().timestamp_millis();
        event.record_latency(latency_keys::BACKEND_RESPONSE_JETSON, now_ms);
        if let Some(service) = &response.timestamps {
            if let Some(start) = service.jetson_start {
                event.record_latency(latency_keys::JETSON_START, start);
            }
            if let Some(end) = service.jetson_end {
                event.record_latency(latency_keys::JETSON_END, end);
            }
        }

        let risk_level = classify(response.fire_detected, response.confidence);

        if let Some(frame) = &response.image_base64 {
            event.evidence = self
                .archiver
                .archive(frame, &event.device_id, &event.event_id, "jpg")
                .await;
        }

        event.risk_level = risk_level;
        event.ai_result = Some(AiResult {
            confidence: response.confidence,
            class: response.class,
            boxes: response.boxes,
            fire_detected: response.fire_detected,
            error: None,
        });

        let alert_status = match risk_level {
            RiskLevel::Confirmed => AlertStatus::Confirmed,
            RiskLevel::Risk => AlertStatus::Risk,
            _ => AlertStatus::Normal,
        };

        self.event_log
            .log(
                EventKind::Analysis,
                format!("Analysis verdict: {:?}", risk_level),
                Some(serde_json::json!({
                    "event_id": event.event_id,
                    "confidence": response.confidence,
                })),
            )
            .await;

        AnalysisOutcome {
            event_id: event.event_id.clone(),
            risk_level,
            alert_status,
        }
    }
}

/// Verdict rule: a detected fire above the confidence bar is CONFIRMED;
/// anything else on a threshold-triggered analysis stays RISK.
pub fn classify(fire_detected: bool, confidence: f64) -> RiskLevel {
    if fire_detected && confidence > CONFIRM_CONFIDENCE {
        RiskLevel::Confirmed
    } else {
        RiskLevel::Risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::MemoryEventStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_classification_rule() {
        assert_eq!(classify(true, 0.9), RiskLevel::Confirmed);
        assert_eq!(classify(true, 0.7), RiskLevel::Risk, "bar is strict");
        assert_eq!(classify(true, 0.3), RiskLevel::Risk);
        assert_eq!(classify(false, 0.99), RiskLevel::Risk);
    }

    #[test]
    fn test_gate_releases_on_drop() {
        let gate = AnalysisGate::new();
        {
            let _permit = gate.try_acquire().expect("gate free");
            assert!(gate.is_busy());
            assert!(gate.try_acquire().is_none());
        }
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_gate_single_flight_under_contention() {
        let gate = Arc::new(AnalysisGate::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let acquired = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            let acquired = acquired.clone();
            tasks.push(tokio::spawn(async move {
                if let Some(_permit) = gate.try_acquire() {
                    acquired.fetch_add(1, Ordering::SeqCst);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(acquired.load(Ordering::SeqCst) >= 1);
        // Gate free again once every task is done
        assert!(gate.try_acquire().is_some());
    }

    fn reading() -> SensorReading {
        SensorReading {
            temperature: 60.0,
            light: 1600.0,
            smoke: 1200.0,
            humidity: Some(5.0),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failed_inference_finalizes_as_normal() {
        let store = Arc::new(MemoryEventStore::new());
        // Nothing listens on this port; the call fails fast
        let orchestrator = AnalysisOrchestrator::new(
            AiClient::with_timeout(
                "http://127.0.0.1:1/analyze".to_string(),
                Duration::from_millis(500),
            ),
            EventRecordStore::new(store.clone()),
            EvidenceArchiver::disabled(),
            Arc::new(RealtimeHub::new()),
            Arc::new(EventLogService::default()),
            "arduino-01".to_string(),
            None,
        );

        let outcome = orchestrator
            .run_analysis(reading(), None)
            .await
            .unwrap()
            .expect("gate was free");

        assert_eq!(outcome.risk_level, RiskLevel::Normal);
        assert_eq!(outcome.alert_status, AlertStatus::Normal);
        assert!(!orchestrator.is_busy(), "gate released after failure");

        let event = store.get(&outcome.event_id).await.expect("finalized event");
        assert_eq!(event.risk_level, RiskLevel::Normal);
        let result = event.ai_result.expect("error verdict recorded");
        assert!(result.error.is_some());
        assert!(event.latencies.contains_key(latency_keys::TOTAL_ROUNDTRIP));
    }
}
