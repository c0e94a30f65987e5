//! End-to-end pipeline behaviour with deterministic stand-ins for the
//! embedding and generation services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use kb_rag::config::Config;
use kb_rag::embedding::EmbeddingProvider;
use kb_rag::error::PipelineError;
use kb_rag::generation::{ChatMessage, GenerationProvider, Role};
use kb_rag::models::Outcome;
use kb_rag::pipeline::RagPipeline;
use kb_rag::store::memory::InMemoryIndex;
use kb_rag::store::{CollectionInfo, IndexEntry, IndexHit, VectorIndex};

// ============ Fakes ============

#[derive(Default)]
struct FixedEmbedder {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> Option<usize> {
        Some(2)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("connection refused");
        }
        Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
    }
}

/// Answers rerank prompts and grounded-answer prompts with canned replies.
struct ScriptedModel {
    rerank_reply: String,
    answer_reply: String,
    fail_answer: bool,
    rerank_calls: AtomicUsize,
    answer_calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(rerank_reply: &str, answer_reply: &str) -> Self {
        Self {
            rerank_reply: rerank_reply.to_string(),
            answer_reply: answer_reply.to_string(),
            fail_answer: false,
            rerank_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
        }
    }

    fn total_calls(&self) -> usize {
        self.rerank_calls.load(Ordering::SeqCst) + self.answer_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let is_answer = messages.iter().any(|m| m.role == Role::System);
        if is_answer {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_answer {
                bail!("API error 500: upstream overloaded");
            }
            Ok(format!("\n{}\n", self.answer_reply))
        } else {
            assert_eq!(temperature, 0.0, "rerank must be deterministic");
            self.rerank_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rerank_reply.clone())
        }
    }
}

/// Returns preset hits regardless of the query vector.
struct FixedIndex {
    hits: Vec<IndexHit>,
}

impl FixedIndex {
    fn new(hits: &[(&str, Option<&str>, f64)]) -> Self {
        Self {
            hits: hits
                .iter()
                .map(|(text, source, distance)| IndexHit {
                    text: text.to_string(),
                    source: source.map(str::to_string),
                    distance: *distance,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn insert(&self, _entries: &[IndexEntry]) -> Result<()> {
        bail!("read-only")
    }

    async fn clear(&self) -> Result<()> {
        bail!("read-only")
    }

    async fn replace_all(&self, _entries: &[IndexEntry], _info: &CollectionInfo) -> Result<()> {
        bail!("read-only")
    }

    async fn nearest(&self, _query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.hits.len())
    }

    async fn info(&self) -> Result<Option<CollectionInfo>> {
        Ok(None)
    }
}

fn pipeline(
    config: &Config,
    embedder: Arc<FixedEmbedder>,
    model: Arc<ScriptedModel>,
    index: Arc<dyn VectorIndex>,
) -> RagPipeline {
    RagPipeline::new(config, embedder, model, index)
}

// ============ Scenarios ============

#[tokio::test]
async fn test_confident_retrieval_is_answered_with_sources() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel::new("1", "The policy requires X. [1]"));
    let index = Arc::new(FixedIndex::new(&[(
        "# Policy\nX is required.",
        Some("policy.md"),
        0.1,
    )]));
    let rag = pipeline(&config, Arc::default(), model.clone(), index);

    let result = rag.run("What does the policy require?").await.unwrap();

    assert_eq!(result.outcome, Outcome::Answered);
    assert_eq!(result.answer, "The policy requires X. [1]");
    assert_eq!(result.sources, vec!["policy.md"]);
    assert_eq!(result.debug.reranked.len(), 1);
    assert_eq!(result.debug.gate_reason, "Retrieval looks OK (best distance=0.100).");
    let citations = result.debug.citations.unwrap();
    assert_eq!(citations.cited, vec![1]);
    assert!(!citations.has_drift());
}

#[tokio::test]
async fn test_weak_retrieval_is_refused_before_generation() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel::new("1", "should never be used"));
    let index = Arc::new(FixedIndex::new(&[
        ("far away", Some("a.md"), 0.95),
        ("further", Some("b.md"), 1.3),
    ]));
    let rag = pipeline(&config, Arc::default(), model.clone(), index);

    let result = rag.run("Unrelated question").await.unwrap();

    assert!(result.is_refused());
    assert!(result.answer.contains("0.950"), "answer: {}", result.answer);
    assert!(result.answer.contains("0.85"), "answer: {}", result.answer);
    assert!(result.answer.contains("knowledge base"));
    assert!(result.sources.is_empty());
    assert!(result.debug.reranked.is_empty());
    assert_eq!(result.debug.retrieved.len(), 2);
    assert_eq!(model.total_calls(), 0);
}

#[tokio::test]
async fn test_malformed_rerank_falls_back_to_retrieval_order() {
    let mut config = Config::default();
    config.retrieval.keep_n = 3;
    let model = Arc::new(ScriptedModel::new("abc, , 99", "Answer [1] [2] [3]."));
    let index = Arc::new(FixedIndex::new(&[
        ("one", Some("1.md"), 0.1),
        ("two", Some("2.md"), 0.2),
        ("three", Some("3.md"), 0.3),
        ("four", Some("4.md"), 0.4),
        ("five", Some("5.md"), 0.5),
    ]));
    let rag = pipeline(&config, Arc::default(), model, index);

    let result = rag.run("question").await.unwrap();

    assert_eq!(result.outcome, Outcome::Answered);
    assert_eq!(result.debug.reranked, result.debug.retrieved[..3].to_vec());
    assert_eq!(result.sources, vec!["1.md", "2.md", "3.md"]);
}

#[tokio::test]
async fn test_sources_are_unique_in_rerank_order() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel::new("3, 1, 2, 4", "Answer [1]."));
    let index = Arc::new(FixedIndex::new(&[
        ("a1", Some("a.md"), 0.1),
        ("a2", Some("a.md"), 0.2),
        ("b1", Some("b.md"), 0.3),
        ("n1", None, 0.4),
    ]));
    let rag = pipeline(&config, Arc::default(), model, index);

    let result = rag.run("question").await.unwrap();

    assert_eq!(result.sources, vec!["b.md", "a.md", "unknown"]);
    let texts: Vec<_> = result.debug.reranked.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["b1", "a1", "a2", "n1"]);
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel::new("2,1", "Two things [1][2]."));
    let index = Arc::new(FixedIndex::new(&[
        ("first", Some("x.md"), 0.2),
        ("second", Some("y.md"), 0.3),
    ]));
    let rag = pipeline(&config, Arc::default(), model, index);

    let first = rag.run("same question").await.unwrap();
    let second = rag.run("same question").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_citation_drift_is_reported_not_rewritten() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel::new("1", "Refunds take 5 days [4]. No proof here."));
    let index = Arc::new(FixedIndex::new(&[("refunds", Some("refunds.md"), 0.2)]));
    let rag = pipeline(&config, Arc::default(), model, index);

    let result = rag.run("refunds?").await.unwrap();

    assert_eq!(result.answer, "Refunds take 5 days [4]. No proof here.");
    let citations = result.debug.citations.unwrap();
    assert_eq!(citations.out_of_range, vec![4]);
    assert_eq!(citations.uncited_sentences, vec!["No proof here.".to_string()]);
}

#[tokio::test]
async fn test_blank_query_refused_without_service_calls() {
    let config = Config::default();
    let embedder = Arc::new(FixedEmbedder::default());
    let model = Arc::new(ScriptedModel::new("1", "unused"));
    let index = Arc::new(FixedIndex::new(&[("x", Some("x.md"), 0.1)]));
    let rag = pipeline(&config, embedder.clone(), model.clone(), index);

    let result = rag.run("  \n ").await.unwrap();

    assert!(result.is_refused());
    assert_eq!(result.debug.gate_reason, "Empty query.");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.total_calls(), 0);
}

// ============ Failures ============

#[tokio::test]
async fn test_empty_index_is_not_initialized() {
    let config = Config::default();
    let embedder = Arc::new(FixedEmbedder::default());
    let rag = pipeline(
        &config,
        embedder.clone(),
        Arc::new(ScriptedModel::new("1", "unused")),
        Arc::new(InMemoryIndex::default()),
    );

    let err = rag.run("anything").await.unwrap_err();

    assert!(matches!(err, PipelineError::KnowledgeBaseNotInitialized { .. }));
    assert!(err.to_string().contains("not initialized"));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_embedding_failure_propagates() {
    let config = Config::default();
    let embedder = Arc::new(FixedEmbedder {
        fail: true,
        ..Default::default()
    });
    let index = Arc::new(FixedIndex::new(&[("x", Some("x.md"), 0.1)]));
    let rag = pipeline(&config, embedder, Arc::new(ScriptedModel::new("1", "x")), index);

    let err = rag.run("anything").await.unwrap_err();
    assert!(matches!(err, PipelineError::Embedding(_)));
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_generation_failure_propagates() {
    let config = Config::default();
    let model = Arc::new(ScriptedModel {
        fail_answer: true,
        ..ScriptedModel::new("1", "unused")
    });
    let index = Arc::new(FixedIndex::new(&[("x", Some("x.md"), 0.1)]));
    let rag = pipeline(&config, Arc::default(), model, index);

    let err = rag.run("anything").await.unwrap_err();
    assert!(matches!(err, PipelineError::Generation(_)));
    assert!(err.is_upstream());
}

// ============ Real index ============

#[tokio::test]
async fn test_in_memory_index_end_to_end() {
    let config = Config::default();
    let index = Arc::new(InMemoryIndex::default());
    index
        .insert(&[
            IndexEntry {
                id: "hr.md-0".to_string(),
                text: "# HR\nOffice hours are 9 to 5.".to_string(),
                source: Some("hr.md".to_string()),
                embedding: vec![0.1, 0.0],
            },
            IndexEntry {
                id: "it.md-1".to_string(),
                text: "# IT\nReset passwords via the portal.".to_string(),
                source: Some("it.md".to_string()),
                embedding: vec![3.0, 0.0],
            },
        ])
        .await
        .unwrap();
    let model = Arc::new(ScriptedModel::new("1", "Office hours are 9 to 5. [1]"));
    let rag = pipeline(&config, Arc::default(), model, index);

    let result = rag.run("When is the office open?").await.unwrap();

    assert_eq!(result.outcome, Outcome::Answered);
    assert_eq!(result.debug.retrieved[0].source, "hr.md");
    assert!(result.debug.retrieved[0].distance < result.debug.retrieved[1].distance);
    assert_eq!(result.sources, vec!["hr.md"]);
}
