//! Core data models used throughout the pipeline.
//!
//! These types represent the chunks produced at ingestion time and the
//! per-query values that flow from retrieval to the final answer.

use serde::{Deserialize, Serialize};

use crate::citations::CitationReport;

/// Source label used when the index has no source metadata for a hit.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A bounded segment of a knowledge-base document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `{source}-{sequential index}`.
    pub id: String,
    /// Path of the source document relative to the knowledge-base root.
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk returned by a nearest-neighbour query, annotated with its
/// distance to that query. Only meaningful for the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub source: String,
    pub distance: f64,
}

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Refused,
    Answered,
}

/// Diagnostic record of how an answer was (or was not) produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugTrace {
    pub gate_reason: String,
    pub retrieved: Vec<Candidate>,
    /// Candidates actually used as generation context, best first.
    pub reranked: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<CitationReport>,
}

/// Everything a caller gets back for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub outcome: Outcome,
    pub answer: String,
    /// Unique source identifiers in first-seen order.
    pub sources: Vec<String>,
    pub debug: DebugTrace,
}

impl PipelineResult {
    pub fn is_refused(&self) -> bool {
        self.outcome == Outcome::Refused
    }
}
