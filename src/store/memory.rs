//! In-memory [`VectorIndex`] for tests and throwaway runs.
//!
//! Rows and collection info live behind one `RwLock`, so
//! [`replace_all`](VectorIndex::replace_all) swaps the whole collection in
//! a single write and readers never see a partial rebuild.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::DistanceMetric;
use crate::embedding::distance;

use super::{top_k, CollectionInfo, IndexEntry, IndexHit, VectorIndex};

#[derive(Default)]
struct State {
    entries: Vec<IndexEntry>,
    info: Option<CollectionInfo>,
}

pub struct InMemoryIndex {
    metric: DistanceMetric,
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            state: RwLock::new(State::default()),
        }
    }

    /// Snapshot of `(text, source)` pairs in insertion order.
    pub fn contents(&self) -> Result<Vec<(String, Option<String>)>> {
        Ok(self
            .read()?
            .entries
            .iter()
            .map(|e| (e.text.clone(), e.source.clone()))
            .collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(DistanceMetric::default())
    }
}

/// Merge `incoming` into `entries` by id. A repeated id overwrites the row in
/// place, so first-insertion order is kept.
fn upsert_all(entries: &mut Vec<IndexEntry>, incoming: &[IndexEntry]) {
    let mut positions: HashMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();

    for entry in incoming {
        match positions.get(&entry.id) {
            Some(&i) => entries[i] = entry.clone(),
            None => {
                positions.insert(entry.id.clone(), entries.len());
                entries.push(entry.clone());
            }
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.write()?;
        upsert_all(&mut state.entries, entries);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        state.entries.clear();
        state.info = None;
        Ok(())
    }

    async fn replace_all(&self, entries: &[IndexEntry], info: &CollectionInfo) -> Result<()> {
        let mut fresh = Vec::with_capacity(entries.len());
        upsert_all(&mut fresh, entries);

        let mut state = self.write()?;
        state.entries = fresh;
        state.info = Some(info.clone());
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        let state = self.read()?;
        let hits = state
            .entries
            .iter()
            .map(|e| {
                Ok(IndexHit {
                    text: e.text.clone(),
                    source: e.source.clone(),
                    distance: distance(self.metric, query, &e.embedding)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(top_k(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn info(&self) -> Result<Option<CollectionInfo>> {
        Ok(self.read()?.info.clone())
    }
}
