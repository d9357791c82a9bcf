//! Long-term memory: an unbounded store with metadata-filtered similarity search

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::{poisoned, Error, Result};
use crate::item::{MemoryItem, MetadataFilter, SearchHit};
use crate::similarity;

/// Unbounded id-keyed store with a fixed embedding dimensionality
pub struct LongTermMemory {
    dimensionality: usize,
    state: RwLock<LtmState>,
}

#[derive(Default)]
struct LtmState {
    entries: HashMap<String, Entry>,
    /// Write counter; the latest write wins score ties
    sequence: u64,
}

struct Entry {
    item: MemoryItem,
    written: u64,
}

impl LongTermMemory {
    /// Create an empty store
    pub fn new(dimensionality: usize) -> Result<Self> {
        if dimensionality == 0 {
            return Err(Error::config("dimensionality must be positive"));
        }

        info!(dimensionality, "Initializing long-term memory");

        Ok(Self {
            dimensionality,
            state: RwLock::new(LtmState::default()),
        })
    }

    fn check_dimensionality(&self, actual: usize) -> Result<()> {
        if actual != self.dimensionality {
            return Err(Error::dimension_mismatch(self.dimensionality, actual));
        }
        Ok(())
    }

    /// Insert or overwrite an item
    pub fn add(&self, item: MemoryItem) -> Result<()> {
        self.check_dimensionality(item.dimensionality())?;

        let mut state = self.state.write().map_err(poisoned)?;
        state.sequence += 1;
        let written = state.sequence;
        let id = item.id.clone();

        let previous = state.entries.insert(id.clone(), Entry { item, written });
        debug!(id = %id, overwrite = previous.is_some(), "Stored long-term item");

        Ok(())
    }

    /// Fetch an item
    pub fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.get(id).map(|entry| entry.item.clone()))
    }

    /// Remove an item, reporting whether it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        let deleted = state.entries.remove(id).is_some();

        if deleted {
            debug!(id = %id, "Deleted long-term item");
        }

        Ok(deleted)
    }

    /// Up to `k` items matching `filter`, ranked by similarity to `query`
    ///
    /// Candidates are restricted to items whose metadata contains every
    /// filter pair with the exact same value before any ranking happens.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimensionality(query.len())?;

        let state = self.state.read().map_err(poisoned)?;
        let candidates = state
            .entries
            .values()
            .filter(|entry| filter.map_or(true, |f| entry.item.matches(f)))
            .map(|entry| (&entry.item, entry.written));

        Ok(similarity::rank(query, candidates, k))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.contains_key(id))
    }

    /// Every stored item, oldest write first
    pub fn items(&self) -> Result<Vec<MemoryItem>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut entries: Vec<&Entry> = state.entries.values().collect();
        entries.sort_by_key(|entry| entry.written);
        Ok(entries.into_iter().map(|entry| entry.item.clone()).collect())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }
}
