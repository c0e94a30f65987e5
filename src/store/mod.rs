//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only thing the retriever and the
//! ingestion pipeline know about storage. Two backends are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`memory::InMemoryIndex`] | tests and throwaway runs |
//! | [`sqlite::SqliteIndex`] | persistent index on disk |
//!
//! Both do a brute-force scan per query, which is plenty for a small
//! internal knowledge base.
//!
//! Implementations must be `Send + Sync`: the index is shared read-only
//! by concurrent queries. [`VectorIndex::replace_all`] must be atomic with
//! respect to readers, so a query never observes a half-rebuilt collection.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::Chunk;

/// One row to insert: chunk text, its source label, and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    /// `None` models a row stored without source metadata.
    pub source: Option<String>,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            source: Some(chunk.source.clone()),
            embedding,
        }
    }
}

/// A nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub text: String,
    pub source: Option<String>,
    pub distance: f64,
}

/// Metadata recorded when a collection is (re)built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub model: String,
    pub dims: usize,
    pub chunk_count: usize,
    /// SHA-256 over the ordered (source, text) pairs; equal on unchanged inputs.
    pub content_hash: String,
    /// Unix timestamp (seconds).
    pub built_at: i64,
}

/// Store of `(text, source, embedding)` rows with nearest-neighbour lookup.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Add rows (same id replaces) |
/// | [`clear`](VectorIndex::clear) | Remove every row and the collection info |
/// | [`replace_all`](VectorIndex::replace_all) | Atomic clear-then-insert |
/// | [`nearest`](VectorIndex::nearest) | `k` closest rows, ascending distance |
/// | [`count`](VectorIndex::count) | Number of rows |
/// | [`info`](VectorIndex::info) | Metadata of the last rebuild |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn replace_all(&self, entries: &[IndexEntry], info: &CollectionInfo) -> Result<()>;

    /// Returns at most `k` hits ordered by ascending distance. Equal
    /// distances keep insertion order.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>>;

    async fn count(&self) -> Result<usize>;

    async fn info(&self) -> Result<Option<CollectionInfo>>;
}

/// Sort hits by ascending distance (stable) and keep the first `k`.
pub(crate) fn top_k(mut hits: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}
