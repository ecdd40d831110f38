//! EvidenceArchiver - Image Evidence Upload
//!
//! ## Responsibilities
//!
//! - Upload AI-returned frames to the object store collaborator
//! - Deterministic key layout: `device_id/YYYY/MM/DD/event_id.ext`
//! - Failure is non-fatal: log, return None, caller proceeds without evidence
//!
//! No retries: the key is idempotent, a retry would simply overwrite.

use crate::error::{Error, Result};
use crate::models::Evidence;
use async_trait::async_trait;
use base64::Engine;
use chrono::{Datelike, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Object store collaborator (blob archive)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store raw bytes under `key`, returning a public location URL
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Bucket/container name, used in the evidence descriptor
    fn bucket(&self) -> &str;
}

/// EvidenceArchiver instance
pub struct EvidenceArchiver {
    store: Option<Arc<dyn ObjectStore>>,
}

impl EvidenceArchiver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Archiver disabled: every archive call returns None
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Upload one frame. `image_base64` is decoded here; a bad payload is
    /// treated like any other upload failure.
    pub async fn archive(
        &self,
        image_base64: &str,
        device_id: &str,
        event_id: &str,
        extension: &str,
    ) -> Option<Evidence> {
        let Some(store) = &self.store else {
            tracing::debug!(event_id = %event_id, "Object store disabled, skipping evidence");
            return None;
        };

        let bytes = match base64::engine::general_purpose::STANDARD.decode(image_base64) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Evidence payload is not valid base64");
                return None;
            }
        };

        let key = evidence_key(device_id, event_id, extension);
        let content_type = match extension {
            "jpg" => "image/jpeg".to_string(),
            ext => format!("image/{}", ext),
        };

        match store.put_object(&key, bytes, &content_type).await {
            Ok(location) => {
                tracing::info!(event_id = %event_id, key = %key, "Evidence archived");
                Some(Evidence {
                    bucket: store.bucket().to_string(),
                    key,
                    location,
                })
            }
            Err(e) => {
                tracing::error!(event_id = %event_id, key = %key, error = %e, "Evidence upload failed");
                None
            }
        }
    }
}

/// `device_id/YYYY/MM/DD/event_id.ext`, dated by upload day
fn evidence_key(device_id: &str, event_id: &str, extension: &str) -> String {
    let now = Utc::now();
    format!(
        "{}/{}/{:02}/{:02}/{}.{}",
        device_id,
        now.year(),
        now.month(),
        now.day(),
        event_id,
        extension
    )
}

/// HTTP gateway implementation of [`ObjectStore`]
pub struct HttpObjectStore {
    http: Client,
    base_url: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(base_url: String, bucket: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url,
            bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let url = format!("{}/{}/{}", self.base_url, self.bucket, key);
        let resp = self
            .http
            .put(&url)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Evidence(format!("upload transport: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Evidence(format!("upload rejected: {}", resp.status())));
        }

        Ok(url)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingStore {
        puts: Mutex<Vec<(String, usize, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_object(
            &self,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<String> {
            if self.fail {
                return Err(Error::Evidence("bucket unreachable".to_string()));
            }
            self.puts
                .lock()
                .await
                .push((key.to_string(), bytes.len(), content_type.to_string()));
            Ok(format!("https://blobs.example.com/evidence/{}", key))
        }

        fn bucket(&self) -> &str {
            "evidence"
        }
    }

    #[test]
    fn test_key_layout() {
        let key = evidence_key("arduino-01", "e1", "jpg");
        let now = Utc::now();
        assert_eq!(
            key,
            format!(
                "arduino-01/{}/{:02}/{:02}/e1.jpg",
                now.year(),
                now.month(),
                now.day()
            )
        );
    }

    #[tokio::test]
    async fn test_archive_success_returns_descriptor() {
        let store = Arc::new(RecordingStore {
            puts: Mutex::new(Vec::new()),
            fail: false,
        });
        let archiver = EvidenceArchiver::new(store.clone());

        let payload = base64::engine::general_purpose::STANDARD.encode(b"jpegbytes");
        let evidence = archiver
            .archive(&payload, "arduino-01", "e1", "jpg")
            .await
            .expect("evidence descriptor");

        assert_eq!(evidence.bucket, "evidence");
        assert!(evidence.key.ends_with("/e1.jpg"));
        assert!(evidence.location.contains(&evidence.key));

        let puts = store.puts.lock().await;
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, b"jpegbytes".len());
        assert_eq!(puts[0].2, "image/jpeg");
    }

    #[tokio::test]
    async fn test_upload_failure_is_non_fatal() {
        let archiver = EvidenceArchiver::new(Arc::new(RecordingStore {
            puts: Mutex::new(Vec::new()),
            fail: true,
        }));
        let payload = base64::engine::general_purpose::STANDARD.encode(b"x");
        assert!(archiver.archive(&payload, "d", "e", "jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_bad_base64_is_non_fatal() {
        let archiver = EvidenceArchiver::new(Arc::new(RecordingStore {
            puts: Mutex::new(Vec::new()),
            fail: false,
        }));
        assert!(archiver.archive("%%%", "d", "e", "jpg").await.is_none());
    }
}
