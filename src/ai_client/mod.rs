//! AiClient - External Inference Service Adapter
//!
//! ## Responsibilities
//!
//! - Send analysis requests to the AI service
//! - Handle response parsing and defaults for partial responses
//! - Carry the accumulating observability timestamp map

use crate::error::{Error, Result};
use crate::models::SensorReading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Request timeout. Generous because the service may stream a frame back.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// AI inference client
pub struct AiClient {
    client: reqwest::Client,
    analyze_url: String,
}

/// Analysis request sent to the AI service
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtsp_url: Option<String>,
    #[serde(rename = "imageBase64", skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    pub sensors: SensorReading,
    /// Ask the service to return the analyzed frame for evidence archiving
    pub include_image: bool,
    /// Observability instants collected so far, echoed and extended downstream
    pub timestamps: BTreeMap<String, i64>,
}

/// Inference timestamps reported by the service itself
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceTimestamps {
    #[serde(default)]
    pub jetson_start: Option<i64>,
    #[serde(default)]
    pub jetson_end: Option<i64>,
}

/// Raw analysis response. Fields default so a partial response still parses.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "fireDetected", default)]
    pub fire_detected: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default)]
    pub boxes: Vec<serde_json::Value>,
    /// Analyzed frame for evidence archiving, when requested
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub timestamps: Option<ServiceTimestamps>,
}

fn default_class() -> String {
    "unknown".to_string()
}

impl AiClient {
    /// Create new AI client
    pub fn new(analyze_url: String) -> Self {
        Self::with_timeout(analyze_url, DEFAULT_TIMEOUT)
    }

    /// Create new AI client with custom timeout
    pub fn with_timeout(analyze_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            analyze_url,
        }
    }

    /// Check whether the AI service answers at all
    pub async fn health_check(&self) -> bool {
        match self.client.get(&self.analyze_url).send().await {
            Ok(_) => true,
            Err(_) => false,
        }
    }

    /// Send one analysis request. Timeout and transport failures surface as
    /// `Error::Inference` so the orchestrator can finalize the event.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        tracing::info!(
            event_id = %request.event_id,
            url = %self.analyze_url,
            has_image = request.image_base64.is_some(),
            "Sending inference request"
        );

        let resp = self
            .client
            .post(&self.analyze_url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("AI service unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "AI service returned {}",
                resp.status()
            )));
        }

        let result: AnalyzeResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Bad AI response: {}", e)))?;

        tracing::info!(
            event_id = %request.event_id,
            fire_detected = result.fire_detected,
            confidence = result.confidence,
            class = %result.class,
            "Inference response received"
        );

        Ok(result)
    }

    /// Get analyze URL
    pub fn analyze_url(&self) -> &str {
        &self.analyze_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_partial_response_fills_defaults() {
        let resp: AnalyzeResponse = serde_json::from_str("{}").unwrap();
        assert!(!resp.fire_detected);
        assert_eq!(resp.confidence, 0.0);
        assert_eq!(resp.class, "unknown");
        assert!(resp.boxes.is_empty());
        assert!(resp.image_base64.is_none());
    }

    #[tokio::test]
    async fn test_health_check_false_when_unreachable() {
        // Nothing listens on this port
        let client = AiClient::with_timeout(
            "http://127.0.0.1:1/analyze".to_string(),
            Duration::from_millis(200),
        );
        assert!(!client.health_check().await);
    }

    #[test]
    fn test_request_wire_shape() {
        let req = AnalyzeRequest {
            event_id: "e1".to_string(),
            rtsp_url: Some("rtsp://cam/stream1".to_string()),
            image_base64: None,
            sensors: SensorReading {
                temperature: 60.0,
                light: 1600.0,
                smoke: 1200.0,
                humidity: Some(5.0),
                timestamp: Utc::now(),
            },
            include_image: true,
            timestamps: BTreeMap::from([("backend_receive_sensor".to_string(), 123_i64)]),
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["event_id"], "e1");
        assert_eq!(json["include_image"], true);
        assert_eq!(json["timestamps"]["backend_receive_sensor"], 123);
        // imageBase64 omitted entirely when absent
        assert!(json.get("imageBase64").is_none());
    }
}
