//! Knowledge-base ingestion.
//!
//! Reads every markdown file under `kb.dir`, chunks it, embeds the chunks in
//! batches and atomically replaces the collection's contents. Re-running on
//! unchanged files yields the same (text, source) contents: ingestion is a
//! full rebuild, never an incremental upsert.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunk::build_chunks;
use crate::config::{Config, KbConfig};
use crate::embedding::EmbeddingProvider;
use crate::models::Chunk;
use crate::store::{CollectionInfo, IndexEntry, VectorIndex};

/// A markdown file read from the knowledge-base directory.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to `kb.dir`, `/`-separated.
    pub source: String,
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub batches: usize,
    pub model: String,
    pub dims: usize,
    pub content_hash: String,
    pub dry_run: bool,
}

/// List and read the knowledge-base documents, sorted by source path.
pub fn load_documents(kb: &KbConfig) -> Result<Vec<Document>> {
    let root = &kb.dir;
    if !root.is_dir() {
        bail!("Knowledge base directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&kb.include_globs)?;
    let exclude_set = build_globset(&["**/.*/**".to_string(), ".*/**".to_string()])?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let source = relative_source(root, path);
        if exclude_set.is_match(&source) || !include_set.is_match(&source) {
            continue;
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        docs.push(Document {
            source,
            path: path.to_path_buf(),
            text,
        });
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(docs)
}

fn relative_source(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // `*.md` matches top-level files only; use `**/*.md` to recurse.
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Chunk all documents with ids numbered sequentially across the whole run.
pub fn plan_chunks(config: &Config, docs: &[Document]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        let next = chunks.len() as i64;
        chunks.extend(build_chunks(&doc.source, &doc.text, &config.chunking, next));
    }
    chunks
}

/// Hash of the ordered (source, text) pairs; equal for equal rebuilds.
pub fn content_hash(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Count documents and chunks without calling any service.
pub fn dry_run(config: &Config) -> Result<IngestReport> {
    let docs = load_documents(&config.kb)?;
    let chunks = plan_chunks(config, &docs);
    let batch_size = config.embedding.batch_size.max(1);

    Ok(IngestReport {
        documents: docs.len(),
        chunks: chunks.len(),
        batches: chunks.len().div_ceil(batch_size),
        model: config.embedding.model.clone().unwrap_or_default(),
        dims: config.embedding.dims.unwrap_or(0),
        content_hash: content_hash(&chunks),
        dry_run: true,
    })
}

/// Rebuild the collection from `kb.dir`.
///
/// Any embedding or index failure aborts the run and leaves the previous
/// collection untouched.
pub async fn run_ingest(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
) -> Result<IngestReport> {
    let docs = load_documents(&config.kb)?;
    let chunks = plan_chunks(config, &docs);
    if chunks.is_empty() {
        tracing::warn!(dir = %config.kb.dir.display(), "no non-empty documents found");
    }

    let batch_size = config.embedding.batch_size.max(1);
    let mut entries = Vec::with_capacity(chunks.len());
    let mut batches = 0;

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_texts(&texts)
            .await
            .with_context(|| format!("Embedding batch {} failed", batches + 1))?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding count mismatch: sent {} texts, got {} vectors",
                batch.len(),
                vectors.len()
            );
        }
        for (chunk, vector) in batch.iter().zip(vectors) {
            entries.push(IndexEntry::from_chunk(chunk, vector));
        }
        batches += 1;
        tracing::debug!(batch = batches, size = batch.len(), "embedded batch");
    }

    let dims = check_dims(&entries, embedder.dims())?;
    let info = CollectionInfo {
        model: embedder.model_name().to_string(),
        dims,
        chunk_count: entries.len(),
        content_hash: content_hash(&chunks),
        built_at: chrono::Utc::now().timestamp(),
    };

    index.replace_all(&entries, &info).await?;

    tracing::info!(
        documents = docs.len(),
        chunks = entries.len(),
        model = %info.model,
        "ingestion complete"
    );

    Ok(IngestReport {
        documents: docs.len(),
        chunks: entries.len(),
        batches,
        model: info.model,
        dims,
        content_hash: info.content_hash,
        dry_run: false,
    })
}

fn check_dims(entries: &[IndexEntry], expected: Option<usize>) -> Result<usize> {
    let Some(first) = entries.first() else {
        return Ok(expected.unwrap_or(0));
    };
    let dims = first.embedding.len();
    if dims == 0 {
        bail!("Embedding provider returned an empty vector");
    }
    if let Some(expected) = expected {
        if expected != dims {
            bail!("Embedding dimension mismatch: configured {}, got {}", expected, dims);
        }
    }
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
        bail!(
            "Embedding dimension mismatch for {}: expected {}, got {}",
            bad.id,
            dims,
            bad.embedding.len()
        );
    }
    Ok(dims)
}
