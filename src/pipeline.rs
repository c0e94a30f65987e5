//! End-to-end question answering.
//!
//! ```text
//! query ─▶ retrieve(k) ─▶ gate ──refused──▶ Refused
//!                           │
//!                        allowed
//!                           ▼
//!                    rerank(keep_n) ─▶ generate ─▶ Answered
//! ```
//!
//! Each [`RagPipeline::run`] call is independent: no state is carried from
//! one question to the next. With deterministic collaborators, the same
//! question against the same index yields the same [`PipelineResult`].

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::citations::check_citations;
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::PipelineError;
use crate::gate::confidence_gate;
use crate::generation::{create_generator, GenerationProvider};
use crate::generator::GroundedGenerator;
use crate::models::{Candidate, DebugTrace, Outcome, PipelineResult};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::store::sqlite::SqliteIndex;
use crate::store::VectorIndex;

pub struct RagPipeline {
    retriever: Retriever,
    reranker: Reranker,
    generator: GroundedGenerator,
    index: Arc<dyn VectorIndex>,
    retrieval: RetrievalConfig,
}

impl RagPipeline {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            retriever: Retriever::new(embedder, index.clone(), config.db.collection.clone()),
            reranker: Reranker::new(generator.clone()),
            generator: GroundedGenerator::new(generator, config.generation.temperature),
            index,
            retrieval: config.retrieval.clone(),
        }
    }

    /// Build the production pipeline: configured providers over the SQLite
    /// index.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::open(config).await?);
        Ok(Self::new(config, embedder, generator, index))
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Answer one question.
    ///
    /// Weak retrieval is a normal [`Outcome::Refused`] result. Errors are
    /// reserved for a missing knowledge base and failing services.
    pub async fn run(&self, query: &str) -> Result<PipelineResult, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(refused("Empty query.".to_string(), Vec::new()));
        }

        let retrieved = self.retriever.retrieve(query, self.retrieval.k).await?;

        let decision = confidence_gate(&retrieved, self.retrieval.max_best_distance);
        if !decision.allowed {
            tracing::info!(reason = %decision.reason, "refused");
            return Ok(refused(decision.reason, retrieved));
        }

        let reranked = self
            .reranker
            .rerank(query, &retrieved, self.retrieval.keep_n)
            .await?;
        let answer = self.generator.generate(query, &reranked).await?;

        let citations = check_citations(&answer, reranked.len());
        if citations.has_drift() {
            tracing::warn!(
                out_of_range = ?citations.out_of_range,
                uncited = citations.uncited_sentences.len(),
                "answer does not fully follow the citation contract"
            );
        }

        let sources = unique_sources(&reranked);
        tracing::info!(
            retrieved = retrieved.len(),
            reranked = reranked.len(),
            sources = sources.len(),
            "answered"
        );

        Ok(PipelineResult {
            outcome: Outcome::Answered,
            answer,
            sources,
            debug: DebugTrace {
                gate_reason: decision.reason,
                retrieved,
                reranked,
                citations: Some(citations),
            },
        })
    }
}

/// The apology shown for a refused query.
pub fn refusal_message(reason: &str) -> String {
    format!(
        "Sorry, I can't answer that confidently from the current knowledge base.\n\n\
         Reason: {}\n\n\
         Try rephrasing the question, or add a document covering this topic to the \
         knowledge base and re-run ingestion.",
        reason
    )
}

fn refused(reason: String, retrieved: Vec<Candidate>) -> PipelineResult {
    PipelineResult {
        outcome: Outcome::Refused,
        answer: refusal_message(&reason),
        sources: Vec::new(),
        debug: DebugTrace {
            gate_reason: reason,
            retrieved,
            reranked: Vec::new(),
            citations: None,
        },
    }
}

/// Sources of `candidates` with duplicates removed, in first-seen order.
pub fn unique_sources(candidates: &[Candidate]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.source.as_str()))
        .map(|c| c.source.clone())
        .collect()
}
