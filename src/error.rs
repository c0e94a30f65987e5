//! Failures a query can surface to its caller.
//!
//! Weak retrieval and malformed reranker output are not errors: the first
//! becomes a refused answer, the second falls back to retrieval order. What
//! remains are failures where answering would mean making something up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("knowledge base not initialized: collection '{collection}' is empty. Run `kbrag ingest` first.")]
    KnowledgeBaseNotInitialized { collection: String },

    #[error("embedding service failed: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error("generation service failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    #[error("vector index failed: {0:#}")]
    Index(#[source] anyhow::Error),
}

impl PipelineError {
    /// Machine-readable code sent in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        if self.is_upstream() {
            "upstream_error"
        } else {
            "kb_not_initialized"
        }
    }

    /// True when the failure came from an external service, as opposed to
    /// missing setup on our side.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, PipelineError::KnowledgeBaseNotInitialized { .. })
    }
}
