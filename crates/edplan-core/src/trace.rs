//! Generation Traces
//!
//! Append-only audit records, one per pipeline stage execution, tagged with
//! the run's correlation id. Retained for audit; never updated or deleted.

use chrono::{DateTime, Utc};
use edplan_types::{CorrelationId, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages that emit trace records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extraction,
    Quantification,
    PromptAssembly,
    Generation,
    Flattening,
    Persistence,
    Indexing,
}

impl PipelineStage {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Extraction => "extraction",
            PipelineStage::Quantification => "quantification",
            PipelineStage::PromptAssembly => "prompt_assembly",
            PipelineStage::Generation => "generation",
            PipelineStage::Flattening => "flattening",
            PipelineStage::Persistence => "persistence",
            PipelineStage::Indexing => "indexing",
        }
    }
}

/// Outcome of one stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOutcome {
    Ok,
    Retried,
    Failed,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTrace {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub stage: PipelineStage,
    /// Set for per-section stages (prompt assembly, generation)
    pub section_key: Option<String>,
    pub duration_ms: u64,
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub outcome: TraceOutcome,
    pub error_kind: Option<String>,
    pub model_id: Option<String>,
    pub prompt_hash: Option<String>,
    pub response_hash: Option<String>,
    /// Free-form note, e.g. "requires_manual_review" or a truncation warning
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GenerationTrace {
    pub fn new(
        correlation_id: CorrelationId,
        stage: PipelineStage,
        outcome: TraceOutcome,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            stage,
            section_key: None,
            duration_ms,
            input_size_bytes: 0,
            output_size_bytes: 0,
            outcome,
            error_kind: None,
            model_id: None,
            prompt_hash: None,
            response_hash: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_section(mut self, section_key: impl Into<String>) -> Self {
        self.section_key = Some(section_key.into());
        self
    }

    pub fn with_sizes(mut self, input_bytes: usize, output_bytes: usize) -> Self {
        self.input_size_bytes = input_bytes;
        self.output_size_bytes = output_bytes;
        self
    }

    pub fn with_error_kind(mut self, error_kind: impl Into<String>) -> Self {
        self.error_kind = Some(error_kind.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_hashes(
        mut self,
        prompt_hash: Option<String>,
        response_hash: Option<String>,
    ) -> Self {
        self.prompt_hash = prompt_hash;
        self.response_hash = response_hash;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Append-only repository for traces
#[async_trait::async_trait]
pub trait TraceRepository: Send + Sync {
    async fn append(&self, trace: GenerationTrace) -> Result<()>;
    async fn list_by_correlation(&self, correlation_id: &CorrelationId)
        -> Result<Vec<GenerationTrace>>;
}
