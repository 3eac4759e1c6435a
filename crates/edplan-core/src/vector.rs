//! Vector Index Abstractions
//!
//! Prior IEP sections and assessment excerpts are chunked, embedded, and
//! stored for similarity retrieval during prompt assembly. The index is
//! eventually consistent with the main store; indexing never blocks IEP
//! creation.

use crate::students::{DisabilityCategory, GradeBand};
use edplan_types::Result;
use serde::{Deserialize, Serialize};

/// Kind of source text a chunk was cut from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    IepSection,
    AssessmentExcerpt,
}

/// Metadata stored alongside each chunk, used for filtered search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_type: SourceType,
    pub disability_category: Option<DisabilityCategory>,
    pub grade_band: Option<GradeBand>,
    /// Set for IEP section chunks
    pub section_key: Option<String>,
    /// Provenance: id of the IEP or assessment document the text came from
    pub source_id: String,
}

/// One embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorChunk {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Conjunction of metadata equality constraints
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub source_type: Option<SourceType>,
    pub disability_category: Option<DisabilityCategory>,
    pub grade_band: Option<GradeBand>,
    pub section_key: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(source_type) = self.source_type {
            if metadata.source_type != source_type {
                return false;
            }
        }
        if let Some(category) = self.disability_category {
            if metadata.disability_category != Some(category) {
                return false;
            }
        }
        if let Some(band) = self.grade_band {
            if metadata.grade_band != Some(band) {
                return false;
            }
        }
        if let Some(ref key) = self.section_key {
            if metadata.section_key.as_deref() != Some(key.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Similarity index over embedded chunks.
///
/// `upsert` is idempotent on chunk_id. `search` returns at most k results in
/// descending similarity order, ties broken by chunk_id ascending.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunk: VectorChunk) -> Result<()>;
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;
    async fn delete(&self, chunk_id: &str) -> Result<()>;
}

/// Pluggable embedding capability producing fixed-dimension vectors
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two vectors, accumulated in one pass.
/// Mismatched or empty inputs score 0, as does any zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, mag_a, mag_b) = a.iter().zip(b).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, mag_a, mag_b), (&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            (dot + x * y, mag_a + x * x, mag_b + y * y)
        },
    );

    let denominator = (mag_a * mag_b).sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

/// Split text into overlapping windows for embedding. Windows are
/// `chunk_size` characters with `overlap` characters shared between
/// neighbors; the final window may be shorter.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < chunk_size, "overlap must be smaller than chunk size");
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
