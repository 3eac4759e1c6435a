//! Embedding Providers
//!
//! Embedding generation is pluggable: a remote HTTP provider for production
//! and a deterministic local hashing embedder for tests, demos, and offline
//! operation. Both produce fixed-dimension vectors.

use edplan_core::Embedder;
use edplan_types::{EdPlanError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Deterministic local embedder: tokens are hashed into a fixed-dimension
/// vector, which is then L2-normalized. Identical text always produces the
/// identical vector, so similarity search is stable across runs.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let index = u64::from_le_bytes(digest[0..8].try_into().expect("digest is 32 bytes"))
                as usize
                % self.dimension;
            // Sign from the ninth digest byte spreads tokens across both
            // directions, keeping unrelated texts near-orthogonal.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Remote HTTP embedding provider
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
}

impl RemoteEmbedder {
    pub fn new(endpoint: String, dimension: usize, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint,
            dimension,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { input: text })
            .send()
            .await
            .map_err(|e| EdPlanError::upstream("embeddings", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EdPlanError::upstream(
                "embeddings",
                format!("returned {}", response.status()),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EdPlanError::upstream("embeddings", format!("invalid body: {}", e)))?;

        if parsed.embedding.len() != self.dimension {
            return Err(EdPlanError::upstream(
                "embeddings",
                format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    parsed.embedding.len()
                ),
            ));
        }
        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
