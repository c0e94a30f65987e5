//! LLM reranking of retrieved candidates.
//!
//! The model sees a numbered, truncated listing of every candidate and
//! answers with a comma-separated list of indices, most useful first. Its
//! reply is untrusted text: [`parse_rerank_indices`] is total, and anything
//! it cannot use falls back to retrieval order.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::generation::{ChatMessage, GenerationProvider};
use crate::models::Candidate;

/// Characters of each candidate shown to the reranker.
pub const PREVIEW_CHARS: usize = 600;

const RERANK_TEMPERATURE: f32 = 0.0;

pub struct Reranker {
    generator: Arc<dyn GenerationProvider>,
}

impl Reranker {
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }

    /// Select and order at most `keep_n` of `candidates`.
    ///
    /// The result is always a subset of the input. A reply with no usable
    /// index yields the first `keep_n` candidates unchanged; only a failing
    /// generation call is an error.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        keep_n: usize,
    ) -> Result<Vec<Candidate>, PipelineError> {
        if candidates.is_empty() || keep_n == 0 {
            return Ok(Vec::new());
        }

        let prompt = build_rerank_prompt(query, candidates);
        let raw = self
            .generator
            .generate(&[ChatMessage::user(prompt)], RERANK_TEMPERATURE)
            .await
            .map_err(PipelineError::Generation)?;

        let indices = parse_rerank_indices(&raw, candidates.len());
        tracing::debug!(raw = %raw.trim(), ?indices, "rerank response");

        if indices.is_empty() {
            tracing::warn!(
                response = %raw.trim(),
                "reranker returned no usable indices; keeping retrieval order"
            );
            return Ok(candidates.iter().take(keep_n).cloned().collect());
        }

        Ok(indices
            .into_iter()
            .take(keep_n)
            .map(|i| candidates[i - 1].clone())
            .collect())
    }
}

/// Render the reranking instruction with a 1-based listing of candidates.
pub fn build_rerank_prompt(query: &str, candidates: &[Candidate]) -> String {
    let listing: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. ({}) {}", i + 1, c.source, preview(&c.text)))
        .collect();

    format!(
        "You are a retrieval reranker. Given a user question and candidate passages, \
         select the passages most useful for answering the question.\n\
         Output ONLY a comma-separated list of numbers (e.g., \"2,5,1\"), most useful first. \
         No other text.\n\n\
         QUESTION:\n{}\n\n\
         CANDIDATES:\n{}\n",
        query,
        listing.join("\n")
    )
}

fn preview(text: &str) -> String {
    text.chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Parse a reranker reply into 1-based indices within `[1, n]`.
///
/// Tokens are comma-separated and must be plain digits after trimming;
/// everything else is skipped. Repeated indices keep their first position.
///
/// ```
/// use kb_rag::rerank::parse_rerank_indices;
///
/// assert_eq!(parse_rerank_indices("3, 1, 3, x, 9", 4), vec![3, 1]);
/// assert!(parse_rerank_indices("abc, , 99", 5).is_empty());
/// ```
pub fn parse_rerank_indices(raw: &str, n: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut indices = Vec::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(index) = token.parse::<usize>() else {
            continue;
        };
        if (1..=n).contains(&index) && seen.insert(index) {
            indices.push(index);
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        reply: String,
        temperatures: Mutex<Vec<f32>>,
    }

    impl ScriptedGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                temperatures: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.temperatures.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _messages: &[ChatMessage], temperature: f32) -> Result<String> {
            self.temperatures.lock().unwrap().push(temperature);
            Ok(self.reply.clone())
        }
    }

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                text: format!("passage {}", i + 1),
                source: format!("doc{}.md", i + 1),
                distance: 0.1 * (i + 1) as f64,
            })
            .collect()
    }

    #[test]
    fn test_parse_keeps_model_order() {
        assert_eq!(parse_rerank_indices("2,5,1", 5), vec![2, 5, 1]);
        assert_eq!(parse_rerank_indices(" 4 ,\n2 ", 5), vec![4, 2]);
    }

    #[test]
    fn test_parse_rejects_out_of_range_and_junk() {
        assert_eq!(parse_rerank_indices("0, 6, -1, +2, 2.0, 3", 5), vec![3]);
        assert!(parse_rerank_indices("", 5).is_empty());
        assert!(parse_rerank_indices("The best passage is 2", 5).is_empty());
        assert!(parse_rerank_indices("99999999999999999999999", 5).is_empty());
    }

    #[test]
    fn test_parse_dedupes_first_occurrence() {
        assert_eq!(parse_rerank_indices("3,1,3,1,2", 3), vec![3, 1, 2]);
    }

    #[test]
    fn test_prompt_lists_truncated_single_line_previews() {
        let mut cands = candidates(2);
        cands[0].text = format!("line one\nline two {}", "x".repeat(1000));
        let prompt = build_rerank_prompt("what?", &cands);

        assert!(prompt.contains("1. (doc1.md) line one line two"));
        assert!(prompt.contains("2. (doc2.md) passage 2"));
        assert!(prompt.contains("QUESTION:\nwhat?"));
        assert!(!prompt.contains(&"x".repeat(PREVIEW_CHARS)));
    }

    #[tokio::test]
    async fn test_rerank_follows_model_and_truncates() {
        let generator = ScriptedGenerator::new("4, 2, 5, 1");
        let reranker = Reranker::new(generator.clone());
        let cands = candidates(5);

        let out = reranker.rerank("q", &cands, 3).await.unwrap();
        assert_eq!(out, vec![cands[3].clone(), cands[1].clone(), cands[4].clone()]);
        assert_eq!(*generator.temperatures.lock().unwrap(), vec![0.0]);
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_to_retrieval_order() {
        let reranker = Reranker::new(ScriptedGenerator::new("abc, , 99"));
        let cands = candidates(5);

        let out = reranker.rerank("q", &cands, 3).await.unwrap();
        assert_eq!(out, cands[..3].to_vec());
    }

    #[tokio::test]
    async fn test_fewer_candidates_than_keep_n() {
        let reranker = Reranker::new(ScriptedGenerator::new(""));
        let cands = candidates(2);

        let out = reranker.rerank("q", &cands, 5).await.unwrap();
        assert_eq!(out, cands);
    }

    #[tokio::test]
    async fn test_empty_input_skips_model() {
        let generator = ScriptedGenerator::new("1");
        let reranker = Reranker::new(generator.clone());

        assert!(reranker.rerank("q", &[], 3).await.unwrap().is_empty());
        assert!(reranker.rerank("q", &candidates(2), 0).await.unwrap().is_empty());
        assert_eq!(generator.calls(), 0);
    }
}
