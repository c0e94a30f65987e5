//! SQLite-backed [`VectorIndex`].
//!
//! Rows live in `kb_chunks`, scoped by collection name; embeddings are
//! stored as little-endian `f32` BLOBs (see [`vec_to_blob`]). Queries load
//! the collection and rank it in process. [`replace_all`](VectorIndex::replace_all)
//! runs in one transaction, so concurrent readers see either the old or the
//! new collection.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::config::{Config, DistanceMetric};
use crate::db;
use crate::embedding::{blob_to_vec, distance, vec_to_blob};
use crate::migrate;

use super::{top_k, CollectionInfo, IndexEntry, IndexHit, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
    metric: DistanceMetric,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, collection: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            pool,
            collection: collection.into(),
            metric,
        }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(
            pool,
            config.db.collection.clone(),
            config.retrieval.metric,
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn next_seq(conn: &mut SqliteConnection, collection: &str) -> Result<i64> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM kb_chunks WHERE collection = ?")
        .bind(collection)
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.map(|m| m + 1).unwrap_or(0))
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    collection: &str,
    entries: &[IndexEntry],
) -> Result<()> {
    let mut seq = next_seq(conn, collection).await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO kb_chunks (collection, id, seq, text, source, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                text = excluded.text,
                source = excluded.source,
                embedding = excluded.embedding
            "#,
        )
        .bind(collection)
        .bind(&entry.id)
        .bind(seq)
        .bind(&entry.text)
        .bind(&entry.source)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *conn)
        .await?;
        seq += 1;
    }

    Ok(())
}

async fn delete_collection(conn: &mut SqliteConnection, collection: &str) -> Result<()> {
    sqlx::query("DELETE FROM kb_chunks WHERE collection = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM kb_collections WHERE name = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_rows(&mut *tx, &self.collection, entries).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_collection(&mut *tx, &self.collection).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_all(&self, entries: &[IndexEntry], info: &CollectionInfo) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        delete_collection(&mut *tx, &self.collection).await?;
        insert_rows(&mut *tx, &self.collection, entries).await?;

        sqlx::query(
            r#"
            INSERT INTO kb_collections (name, model, dims, chunk_count, content_hash, built_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.collection)
        .bind(&info.model)
        .bind(info.dims as i64)
        .bind(info.chunk_count as i64)
        .bind(&info.content_hash)
        .bind(info.built_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            "SELECT text, source, embedding FROM kb_chunks WHERE collection = ? ORDER BY seq",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(IndexHit {
                text: row.try_get("text")?,
                source: row.try_get("source")?,
                distance: distance(self.metric, query, &blob_to_vec(&blob))?,
            });
        }

        Ok(top_k(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn info(&self) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            "SELECT model, dims, chunk_count, content_hash, built_at FROM kb_collections WHERE name = ?",
        )
        .bind(&self.collection)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let dims: i64 = row.try_get("dims")?;
        let chunk_count: i64 = row.try_get("chunk_count")?;
        Ok(Some(CollectionInfo {
            model: row.try_get("model")?,
            dims: dims as usize,
            chunk_count: chunk_count as usize,
            content_hash: row.try_get("content_hash")?,
            built_at: row.try_get("built_at")?,
        }))
    }
}
