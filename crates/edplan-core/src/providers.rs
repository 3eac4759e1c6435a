//! External Provider Abstractions
//!
//! The pipeline treats object storage, the OCR form parser, and the LLM as
//! external fallible services behind traits. Infrastructure implementations
//! live in `edplan-infra`; tests substitute scripted providers.

use edplan_types::Result;
use serde::{Deserialize, Serialize};

/// Fetches raw document bytes from a storage URI
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

/// One entity recognized by the form parser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrEntity {
    /// Parser-assigned type, e.g. "subtest_score" or "table_cell"
    pub entity_type: String,
    pub mention_text: String,
    pub confidence: f64,
}

/// A contiguous text block with recognition confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrTextBlock {
    pub text: String,
    pub confidence: f64,
}

/// A recognized table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub confidence: f64,
}

/// Structured output of the OCR/form-parser service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrDocument {
    pub text_blocks: Vec<OcrTextBlock>,
    pub entities: Vec<OcrEntity>,
    pub tables: Vec<OcrTable>,
}

impl OcrDocument {
    pub fn is_empty(&self) -> bool {
        self.text_blocks.is_empty() && self.entities.is_empty() && self.tables.is_empty()
    }
}

/// Optional hints passed through to the parser
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrHints {
    /// Declared assessment type label, when known
    pub document_kind: Option<String>,
}

/// External OCR/form-parser capability
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    async fn parse(&self, bytes: &[u8], hints: &OcrHints) -> Result<OcrDocument>;
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One LLM completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Ask for a JSON-only response MIME type
    pub json_mode: bool,
}

/// One LLM completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model_id: String,
    pub total_tokens: Option<u32>,
}

/// External LLM capability, request/response only
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
