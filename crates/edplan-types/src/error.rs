//! Error types for the EdPlan pipeline

use thiserror::Error;

/// Main error type for the EdPlan crates
#[derive(Error, Debug)]
pub enum EdPlanError {
    /// Malformed input: bad enum value, missing required field, out-of-range
    /// date. Never retried.
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// Referenced entity absent. Not retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Principal's role does not permit the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Transient failure from an external service (OCR, LLM, vector store,
    /// object storage). Retried per-component, surfaced as 503 after
    /// exhaustion.
    #[error("Upstream '{service}' unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// Permanent failure to parse an assessment document.
    #[error("Extraction failed at {stage}: {reason}")]
    ExtractionFailed { stage: String, reason: String },

    /// LLM returned persistently unparseable or schema-violating content
    /// after retries.
    #[error("Generation failed for section '{section}': {reason}")]
    GenerationFailed { section: String, reason: String },

    /// Template section keys do not match generated content keys at persist
    /// time.
    #[error("Template mismatch: {0}")]
    TemplateMismatch(String),

    /// Requested status change not allowed by a state machine.
    #[error("Illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },

    /// Pipeline wall-clock budget exhausted.
    #[error("Deadline exceeded after {elapsed_ms}ms in stage '{stage}'")]
    DeadlineExceeded { stage: String, elapsed_ms: u64 },

    /// Version-lock acquisition timed out or a concurrent write collided.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database related errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Lock acquisition errors
    #[error("Lock error: {0}")]
    LockError(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error with custom message
    #[error("Error: {0}")]
    Other(String),
}

impl EdPlanError {
    /// Convenience constructor for validation errors
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EdPlanError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for upstream failures
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        EdPlanError::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the error payload
    pub fn code(&self) -> &'static str {
        match self {
            EdPlanError::Validation { .. } => "validation_error",
            EdPlanError::NotFound(_) => "not_found",
            EdPlanError::Forbidden(_) => "forbidden",
            EdPlanError::UpstreamUnavailable { .. } => "upstream_unavailable",
            EdPlanError::ExtractionFailed { .. } => "extraction_failed",
            EdPlanError::GenerationFailed { .. } => "generation_failed",
            EdPlanError::TemplateMismatch(_) => "template_mismatch",
            EdPlanError::IllegalTransition { .. } => "illegal_transition",
            EdPlanError::DeadlineExceeded { .. } => "deadline_exceeded",
            EdPlanError::Conflict(_) => "conflict",
            EdPlanError::ConfigError(_) => "config_error",
            EdPlanError::DatabaseError(_) => "database_error",
            EdPlanError::LockError(_) => "lock_error",
            EdPlanError::HttpError(_) => "http_error",
            EdPlanError::Serialization { .. } => "serialization_error",
            EdPlanError::Io { .. } => "io_error",
            EdPlanError::Other(_) => "internal_error",
        }
    }

    /// HTTP status code for the ingress layer
    pub fn http_status(&self) -> u16 {
        match self {
            EdPlanError::Validation { .. } => 400,
            EdPlanError::NotFound(_) => 404,
            EdPlanError::Forbidden(_) => 403,
            EdPlanError::UpstreamUnavailable { .. } => 503,
            EdPlanError::ExtractionFailed { .. } => 422,
            EdPlanError::GenerationFailed { .. } => 422,
            EdPlanError::TemplateMismatch(_) => 409,
            EdPlanError::IllegalTransition { .. } => 409,
            EdPlanError::DeadlineExceeded { .. } => 503,
            EdPlanError::Conflict(_) => 409,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for EdPlanError {
    fn from(error: serde_json::Error) -> Self {
        EdPlanError::Serialization {
            source: Box::new(error),
        }
    }
}

impl From<anyhow::Error> for EdPlanError {
    fn from(error: anyhow::Error) -> Self {
        EdPlanError::Other(format!("{}", error))
    }
}

/// Result type for the EdPlan crates
pub type Result<T> = std::result::Result<T, EdPlanError>;
