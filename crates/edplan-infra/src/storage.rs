//! Object Storage Access
//!
//! The pipeline only ever holds storage URIs; this client fetches the bytes.
//! Local `file://` URIs are read directly, anything `http(s)://` goes
//! through reqwest with bounded retries.

use crate::retry::{with_retries, RetryPolicy};
use edplan_core::DocumentStore;
use edplan_types::{EdPlanError, Result};
use std::time::Duration;

/// Document fetcher for assessment PDFs
pub struct DocumentFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl DocumentFetcher {
    pub fn new(timeout_seconds: u64, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, policy }
    }

    async fn fetch_http(&self, uri: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| EdPlanError::upstream("storage", format!("GET failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EdPlanError::NotFound(format!("Document at {}", uri)));
        }
        if status.is_server_error() {
            return Err(EdPlanError::upstream(
                "storage",
                format!("GET {} returned {}", uri, status),
            ));
        }
        if !status.is_success() {
            return Err(EdPlanError::ExtractionFailed {
                stage: "fetch".to_string(),
                reason: format!("GET {} returned {}", uri, status),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EdPlanError::upstream("storage", format!("body read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl DocumentStore for DocumentFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if let Some(path) = uri.strip_prefix("file://") {
            return tokio::fs::read(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EdPlanError::NotFound(format!("Document at {}", uri))
                } else {
                    EdPlanError::Io { source: e }
                }
            });
        }

        let (result, _) = with_retries(self.policy, "storage.fetch", || self.fetch_http(uri)).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fetcher() -> DocumentFetcher {
        DocumentFetcher::new(5, RetryPolicy::new(1, 0.001))
    }

    #[tokio::test]
    async fn test_file_uri_reads_local_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.7 test").unwrap();
        let uri = format!("file://{}", file.path().display());

        let bytes = fetcher().fetch(&uri).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7 test");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let result = fetcher().fetch("file:///nonexistent/report.pdf").await;
        assert!(matches!(result, Err(EdPlanError::NotFound(_))));
    }
}
