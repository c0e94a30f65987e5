//! Knowledge-base statistics for `kbrag stats`.
//!
//! Shows what the collection currently holds: chunk count, per-document
//! breakdown, and the fingerprint written by the last ingestion.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::models::UNKNOWN_SOURCE;
use crate::store::sqlite::SqliteIndex;
use crate::store::{CollectionInfo, VectorIndex};

pub struct KbStats {
    pub collection: String,
    pub size_bytes: u64,
    pub chunks: usize,
    /// `(source, chunk count)`, largest first.
    pub by_source: Vec<(String, i64)>,
    pub info: Option<CollectionInfo>,
}

pub async fn collect_stats(config: &Config, index: &SqliteIndex) -> Result<KbStats> {
    let chunks = index.count().await?;
    let info = index.info().await?;

    let rows = sqlx::query(
        r#"
        SELECT COALESCE(source, ?) AS source, COUNT(*) AS chunk_count
        FROM kb_chunks
        WHERE collection = ?
        GROUP BY COALESCE(source, ?)
        ORDER BY chunk_count DESC, source ASC
        "#,
    )
    .bind(UNKNOWN_SOURCE)
    .bind(&config.db.collection)
    .bind(UNKNOWN_SOURCE)
    .fetch_all(index.pool())
    .await?;

    let by_source = rows
        .iter()
        .map(|row| (row.get("source"), row.get("chunk_count")))
        .collect();

    let size_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(KbStats {
        collection: config.db.collection.clone(),
        size_bytes,
        chunks,
        by_source,
        info,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let index = SqliteIndex::open(config).await?;
    let stats = collect_stats(config, &index).await?;
    index.close().await;

    println!("Knowledge Base Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!("  Collection:  {}", stats.collection);
    println!("  Chunks:      {}", stats.chunks);

    match &stats.info {
        Some(info) => {
            println!("  Model:       {} ({} dims)", info.model, info.dims);
            println!("  Built:       {}", format_ts_relative(info.built_at));
            println!("  Content:     {}", short_hash(&info.content_hash));
        }
        None => {
            println!();
            println!("  Not initialized. Run `kbrag ingest` to build the collection.");
        }
    }

    if !stats.by_source.is_empty() {
        println!();
        println!("  {:<40} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(49));
        for (source, count) in &stats.by_source {
            println!("  {:<40} {:>8}", source, count);
        }
    }

    println!();
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });
    match delta {
        0..=59 => "just now".to_string(),
        60..=3599 => plural(delta / 60, "min"),
        3600..=86_399 => plural(delta / 3600, "hour"),
        86_400..=2_591_999 => plural(delta / 86_400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
