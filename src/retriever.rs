//! Query-time candidate retrieval.
//!
//! Embeds the question and asks the vector index for its nearest chunks.
//! No filtering happens here; deciding whether the hits are good enough is
//! the confidence gate's job.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::PipelineError;
use crate::models::{Candidate, UNKNOWN_SOURCE};
use crate::store::VectorIndex;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
        }
    }

    /// Fetch the `k` nearest chunks to `query`, ascending by distance.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::KnowledgeBaseNotInitialized`] when the index is empty.
    /// - [`PipelineError::Embedding`] / [`PipelineError::Index`] when a
    ///   service call fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Candidate>, PipelineError> {
        let stored = self.index.count().await.map_err(PipelineError::Index)?;
        if stored == 0 {
            return Err(PipelineError::KnowledgeBaseNotInitialized {
                collection: self.collection.clone(),
            });
        }

        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .map_err(PipelineError::Embedding)?;

        let hits = self
            .index
            .nearest(&query_vec, k)
            .await
            .map_err(PipelineError::Index)?;

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| Candidate {
                text: hit.text,
                source: hit.source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
                distance: hit.distance,
            })
            .collect();

        tracing::debug!(
            k,
            retrieved = candidates.len(),
            best = candidates.first().map(|c| c.distance),
            "retrieved candidates"
        );

        Ok(candidates)
    }
}
