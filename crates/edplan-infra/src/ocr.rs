//! OCR Form-Parser Client
//!
//! Thin typed client for the external OCR/form-parser service. Documents are
//! submitted as base64 payloads; the response carries text blocks, entities,
//! and tables with per-item confidences.

use base64::{engine::general_purpose, Engine as _};
use edplan_core::{OcrDocument, OcrEntity, OcrHints, OcrProvider, OcrTable, OcrTextBlock};
use edplan_types::{EdPlanError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    content: String,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_kind: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    text_blocks: Vec<TextBlockDto>,
    #[serde(default)]
    entities: Vec<EntityDto>,
    #[serde(default)]
    tables: Vec<TableDto>,
}

#[derive(Debug, Deserialize)]
struct TextBlockDto {
    text: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct EntityDto {
    #[serde(rename = "type")]
    entity_type: String,
    mention_text: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct TableDto {
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    confidence: f64,
}

/// HTTP client for the form-parser service
pub struct FormParserClient {
    client: reqwest::Client,
    endpoint: String,
}

impl FormParserClient {
    pub fn new(endpoint: String, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, endpoint }
    }
}

#[async_trait::async_trait]
impl OcrProvider for FormParserClient {
    async fn parse(&self, bytes: &[u8], hints: &OcrHints) -> Result<OcrDocument> {
        let request = ParseRequest {
            content: general_purpose::STANDARD.encode(bytes),
            mime_type: "application/pdf",
            document_kind: hints.document_kind.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EdPlanError::upstream("ocr", format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EdPlanError::upstream(
                "ocr",
                format!("parser returned {}", status),
            ));
        }
        if !status.is_success() {
            return Err(EdPlanError::ExtractionFailed {
                stage: "ocr".to_string(),
                reason: format!("parser returned {}", status),
            });
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| EdPlanError::upstream("ocr", format!("invalid response body: {}", e)))?;

        Ok(OcrDocument {
            text_blocks: parsed
                .text_blocks
                .into_iter()
                .map(|b| OcrTextBlock {
                    text: b.text,
                    confidence: b.confidence,
                })
                .collect(),
            entities: parsed
                .entities
                .into_iter()
                .map(|e| OcrEntity {
                    entity_type: e.entity_type,
                    mention_text: e.mention_text,
                    confidence: e.confidence,
                })
                .collect(),
            tables: parsed
                .tables
                .into_iter()
                .map(|t| OcrTable {
                    headers: t.headers,
                    rows: t.rows,
                    confidence: t.confidence,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_deserializes_with_defaults() {
        let body = r#"{
            "entities": [
                {"type": "subtest_score", "mention_text": "Similarities 12", "confidence": 0.93}
            ]
        }"#;
        let parsed: ParseResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.text_blocks.is_empty());
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities[0].entity_type, "subtest_score");
    }
}
