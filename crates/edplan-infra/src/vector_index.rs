//! In-Memory Vector Index
//!
//! Cosine-similarity search over embedded chunks with conjunctive metadata
//! filtering. Upsert is idempotent on chunk id; ties in similarity are
//! broken by chunk id ascending so results are stable.

use edplan_core::{cosine_similarity, SearchFilter, SearchHit, VectorChunk, VectorIndex};
use edplan_types::{EdPlanError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory implementation of VectorIndex
pub struct InMemoryVectorIndex {
    chunks: Arc<RwLock<HashMap<String, VectorChunk>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunk: VectorChunk) -> Result<()> {
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        chunks.insert(chunk.chunk_id.clone(), chunk);
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;

        let mut hits: Vec<SearchHit> = chunks
            .values()
            .filter(|chunk| filter.matches(&chunk.metadata))
            .map(|chunk| SearchHit {
                chunk_id: chunk.chunk_id.clone(),
                text: chunk.text.clone(),
                score: cosine_similarity(&chunk.embedding, query_embedding),
                metadata: chunk.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        chunks.remove(chunk_id);
        Ok(())
    }
}
