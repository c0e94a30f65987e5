//! Grounded answer generation.
//!
//! Numbers the reranked candidates as context blocks and asks the model to
//! answer from them alone, citing blocks as `[1]`, `[2]`, ... The model's
//! reply is returned trimmed and otherwise untouched; see
//! [`citations`](crate::citations) for the post-hoc check.

use std::sync::Arc;

use crate::error::PipelineError;
use crate::generation::{ChatMessage, GenerationProvider};
use crate::models::Candidate;

/// What the model is told to say when the context does not support an answer.
pub const REFUSAL_SENTENCE: &str = "I don't know based on the current knowledge base.";

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub const SYSTEM_PROMPT: &str = "You are a careful assistant. Answer ONLY using the provided context. \
If the answer is not explicitly supported by the context, say:\n\
\"I don't know based on the current knowledge base.\"\n\
You MUST cite sources using [1], [2], etc. \
Do not invent policies, numbers, dates, or rules.";

/// Render candidates as `[i] Source: {source}` blocks, numbered from 1.
pub fn build_context_blocks(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] Source: {}\n{}", i + 1, c.source, c.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn build_user_message(query: &str, context: &str) -> String {
    format!(
        "QUESTION:\n{}\n\n\
         CONTEXT:\n{}\n\n\
         INSTRUCTIONS:\n\
         - Provide a concise answer.\n\
         - Every factual statement must include at least one citation like [1].\n\
         - If you cannot find support in context, refuse.",
        query, context
    )
}

pub struct GroundedGenerator {
    generator: Arc<dyn GenerationProvider>,
    temperature: f32,
}

impl GroundedGenerator {
    pub fn new(generator: Arc<dyn GenerationProvider>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    pub async fn generate(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> Result<String, PipelineError> {
        if candidates.is_empty() {
            return Ok(REFUSAL_SENTENCE.to_string());
        }

        let context = build_context_blocks(candidates);
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_user_message(query, &context)),
        ];
        tracing::debug!(blocks = candidates.len(), "generating grounded answer");

        let answer = self
            .generator
            .generate(&messages, self.temperature)
            .await
            .map_err(PipelineError::Generation)?;

        Ok(answer.trim().to_string())
    }
}
