//! Short-term memory: a capacity-bounded LRU cache of embedded items

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::{poisoned, Error, Result};
use crate::item::{MemoryItem, SearchHit};
use crate::similarity;

/// Fixed-capacity cache that evicts the least recently used item
///
/// `add` and `get` are accesses and move an item to the most recently used
/// position. `search` and `peek` are reads and leave the order alone.
pub struct ShortTermMemory {
    capacity: usize,
    state: RwLock<StmState>,
}

struct StmState {
    entries: HashMap<String, Entry>,
    /// Access tick -> id, oldest first
    order: BTreeMap<u64, String>,
    tick: u64,
    dimensionality: Option<usize>,
}

struct Entry {
    item: MemoryItem,
    tick: u64,
}

impl StmState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, id: &str) -> Option<&MemoryItem> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(id)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, id.to_string());
        Some(&entry.item)
    }

    fn check_dimensionality(&self, actual: usize) -> Result<()> {
        match self.dimensionality {
            Some(expected) if expected != actual => Err(Error::dimension_mismatch(expected, actual)),
            _ => Ok(()),
        }
    }
}

impl ShortTermMemory {
    /// Create a cache whose dimensionality is pinned by the first add
    pub fn new(capacity: usize) -> Result<Self> {
        Self::build(capacity, None)
    }

    /// Create a cache with a fixed dimensionality
    pub fn with_dimensionality(capacity: usize, dimensionality: usize) -> Result<Self> {
        if dimensionality == 0 {
            return Err(Error::config("dimensionality must be positive"));
        }
        Self::build(capacity, Some(dimensionality))
    }

    fn build(capacity: usize, dimensionality: Option<usize>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("short-term capacity must be positive"));
        }

        info!(capacity, ?dimensionality, "Initializing short-term memory");

        Ok(Self {
            capacity,
            state: RwLock::new(StmState {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
                dimensionality,
            }),
        })
    }

    /// Insert or overwrite an item and mark it most recently used
    ///
    /// Returns the id evicted to make room, if any. Overwriting an existing
    /// id never evicts.
    pub fn add(&self, item: MemoryItem) -> Result<Option<String>> {
        if item.embedding.is_empty() {
            return Err(Error::invalid_input("embedding must not be empty"));
        }

        let mut guard = self.state.write().map_err(poisoned)?;
        let state = &mut *guard;
        state.check_dimensionality(item.dimensionality())?;
        state.dimensionality.get_or_insert(item.dimensionality());

        let tick = state.next_tick();
        let id = item.id.clone();

        if let Some(entry) = state.entries.get_mut(&id) {
            let stale = std::mem::replace(&mut entry.tick, tick);
            entry.item = item;
            state.order.remove(&stale);
            state.order.insert(tick, id.clone());
            debug!(id = %id, "Overwrote short-term item");
            return Ok(None);
        }

        let mut evicted = None;
        if state.entries.len() >= self.capacity {
            if let Some((_, oldest)) = state.order.pop_first() {
                state.entries.remove(&oldest);
                debug!(id = %oldest, "Evicted from short-term memory");
                evicted = Some(oldest);
            }
        }

        state.entries.insert(id.clone(), Entry { item, tick });
        state.order.insert(tick, id.clone());
        debug!(id = %id, len = state.entries.len(), "Added short-term item");

        Ok(evicted)
    }

    /// Fetch an item and mark it most recently used
    pub fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.touch(id).cloned())
    }

    /// Fetch an item without touching the recency order
    pub fn peek(&self, id: &str) -> Result<Option<MemoryItem>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.get(id).map(|entry| entry.item.clone()))
    }

    /// Up to `k` resident items ranked by similarity to `query`
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.read().map_err(poisoned)?;
        state.check_dimensionality(query.len())?;

        Ok(similarity::rank(
            query,
            state.entries.values().map(|entry| (&entry.item, entry.tick)),
            k,
        ))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.contains_key(id))
    }

    /// Resident ids, most recently used first
    pub fn ids_by_recency(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.order.values().rev().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The pinned dimensionality, if one has been set
    pub fn dimensionality(&self) -> Result<Option<usize>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.dimensionality)
    }
}
