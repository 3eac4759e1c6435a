//! Configuration types for the EdPlan pipeline
//!
//! Configuration is constructed once at startup and passed through explicit
//! context objects. There are no module-level instances.

use crate::error::{EdPlanError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main configuration structure for the EdPlan system
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EdPlanConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub extraction: ExtractionConfig,
    pub vector: VectorConfig,
    pub flattener: FlattenerConfig,
    pub versioning: VersioningConfig,
    pub quantification: QuantificationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL; empty disables the relational store (in-memory repos only)
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// LLM generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which model to call
    pub model_id: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Bounded fan-out within a single IEP; 1 means strictly sequential
    pub max_section_parallelism: usize,
    /// Process-wide concurrent request cap across all pipelines
    pub max_concurrent_requests: usize,
    /// Token-bucket refill rate, requests per minute
    pub requests_per_minute: u32,
    pub request_timeout_seconds: u64,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wall-clock budget for one generate_iep run
    pub deadline_seconds: u64,
}

/// Document extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub ocr_endpoint: String,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_seconds: f64,
    pub request_timeout_seconds: u64,
}

/// Vector index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub top_k: usize,
    pub embedding_dim: usize,
    pub embedding_endpoint: Option<String>,
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
}

/// Response flattener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenerConfig {
    pub max_depth: usize,
}

/// Versioned writer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    pub lock_timeout_seconds: u64,
}

/// Quantification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantificationConfig {
    /// Profiles below this confidence floor force the IEP to stay a draft
    pub confidence_floor_for_draft_only: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            temperature: 0.5,
            max_output_tokens: 8192,
            max_section_parallelism: 1,
            max_concurrent_requests: 8,
            requests_per_minute: 60,
            request_timeout_seconds: 120,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: 300,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: "http://localhost:9090/v1/parse".to_string(),
            retry_max_attempts: 3,
            retry_backoff_base_seconds: 1.0,
            request_timeout_seconds: 60,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            embedding_dim: 768,
            embedding_endpoint: None,
            chunk_size_chars: 1000,
            chunk_overlap_chars: 200,
        }
    }
}

impl Default for FlattenerConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            lock_timeout_seconds: 10,
        }
    }
}

impl Default for QuantificationConfig {
    fn default() -> Self {
        Self {
            confidence_floor_for_draft_only: 0.60,
        }
    }
}

impl EdPlanConfig {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(host) = env::var("API_HOST") {
            config.api.host = host;
        }
        if let Ok(port) = env::var("API_PORT") {
            config.api.port = port
                .parse()
                .map_err(|_| EdPlanError::ConfigError("Invalid API_PORT".to_string()))?;
        }
        if let Ok(cors) = env::var("API_CORS_ORIGINS") {
            config.api.cors_origins = cors.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(model) = env::var("LLM_MODEL_ID") {
            config.llm.model_id = model;
        }
        if let Ok(endpoint) = env::var("LLM_ENDPOINT") {
            config.llm.endpoint = endpoint;
        }
        config.llm.api_key = env::var("LLM_API_KEY").ok();
        if let Ok(temperature) = env::var("LLM_TEMPERATURE") {
            config.llm.temperature = temperature
                .parse()
                .map_err(|_| EdPlanError::ConfigError("Invalid LLM_TEMPERATURE".to_string()))?;
        }
        if let Ok(parallelism) = env::var("LLM_MAX_SECTION_PARALLELISM") {
            config.llm.max_section_parallelism = parallelism.parse().map_err(|_| {
                EdPlanError::ConfigError("Invalid LLM_MAX_SECTION_PARALLELISM".to_string())
            })?;
        }

        if let Ok(deadline) = env::var("PIPELINE_DEADLINE_SECONDS") {
            config.pipeline.deadline_seconds = deadline.parse().map_err(|_| {
                EdPlanError::ConfigError("Invalid PIPELINE_DEADLINE_SECONDS".to_string())
            })?;
        }
        if let Ok(endpoint) = env::var("EXTRACTION_OCR_ENDPOINT") {
            config.extraction.ocr_endpoint = endpoint;
        }
        if let Ok(attempts) = env::var("EXTRACTION_RETRY_MAX_ATTEMPTS") {
            config.extraction.retry_max_attempts = attempts.parse().map_err(|_| {
                EdPlanError::ConfigError("Invalid EXTRACTION_RETRY_MAX_ATTEMPTS".to_string())
            })?;
        }
        if let Ok(top_k) = env::var("VECTOR_TOP_K") {
            config.vector.top_k = top_k
                .parse()
                .map_err(|_| EdPlanError::ConfigError("Invalid VECTOR_TOP_K".to_string()))?;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EdPlanError::ConfigError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| EdPlanError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.port == 0 {
            return Err(EdPlanError::ConfigError("API port must be > 0".to_string()));
        }
        if self.llm.model_id.is_empty() {
            return Err(EdPlanError::ConfigError(
                "LLM model_id cannot be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EdPlanError::ConfigError(
                "LLM temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.llm.max_section_parallelism == 0 || self.llm.max_section_parallelism > 4 {
            return Err(EdPlanError::ConfigError(
                "LLM max_section_parallelism must be between 1 and 4".to_string(),
            ));
        }
        if self.pipeline.deadline_seconds == 0 {
            return Err(EdPlanError::ConfigError(
                "Pipeline deadline must be > 0".to_string(),
            ));
        }
        if self.extraction.retry_max_attempts == 0 {
            return Err(EdPlanError::ConfigError(
                "Extraction retry_max_attempts must be > 0".to_string(),
            ));
        }
        if self.vector.embedding_dim == 0 {
            return Err(EdPlanError::ConfigError(
                "Vector embedding_dim must be > 0".to_string(),
            ));
        }
        if self.vector.chunk_overlap_chars >= self.vector.chunk_size_chars {
            return Err(EdPlanError::ConfigError(
                "Vector chunk overlap must be smaller than chunk size".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quantification.confidence_floor_for_draft_only) {
            return Err(EdPlanError::ConfigError(
                "Quantification confidence floor must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EdPlanConfig::default();
        assert_eq!(config.pipeline.deadline_seconds, 300);
        assert_eq!(config.vector.top_k, 3);
        assert_eq!(config.vector.embedding_dim, 768);
        assert_eq!(config.flattener.max_depth, 5);
        assert_eq!(config.versioning.lock_timeout_seconds, 10);
        assert_eq!(config.llm.max_section_parallelism, 1);
        assert!((config.quantification.confidence_floor_for_draft_only - 0.60).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(EdPlanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_parallelism() {
        let mut config = EdPlanConfig::default();
        config.llm.max_section_parallelism = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_larger_than_chunk() {
        let mut config = EdPlanConfig::default();
        config.vector.chunk_overlap_chars = 2000;
        assert!(config.validate().is_err());
    }
}
