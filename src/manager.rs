//! Coordination of the two memory tiers

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{poisoned, Result};
use crate::item::{MemoryItem, MetadataFilter, SearchHit};
use crate::ltm::LongTermMemory;
use crate::stm::ShortTermMemory;

/// Owns a short-term and a long-term store and moves items between them
pub struct MemoryManager {
    stm: ShortTermMemory,
    ltm: LongTermMemory,
    promotion: Mutex<()>,
}

impl MemoryManager {
    /// Wrap already constructed stores
    pub fn new(stm: ShortTermMemory, ltm: LongTermMemory) -> Self {
        Self {
            stm,
            ltm,
            promotion: Mutex::new(()),
        }
    }

    /// Build both stores from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let stm = ShortTermMemory::with_dimensionality(config.stm_capacity, config.dimensionality)?;
        let ltm = LongTermMemory::new(config.dimensionality)?;

        Ok(Self::new(stm, ltm))
    }

    /// Get the short-term store
    pub fn stm(&self) -> &ShortTermMemory {
        &self.stm
    }

    /// Get the long-term store
    pub fn ltm(&self) -> &LongTermMemory {
        &self.ltm
    }

    /// Add an item to short-term memory, returning any evicted id
    pub fn add(&self, item: MemoryItem) -> Result<Option<String>> {
        self.stm.add(item)
    }

    /// Look an id up in short-term memory first, then long-term memory
    pub fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        if let Some(item) = self.stm.get(id)? {
            return Ok(Some(item));
        }
        self.ltm.get(id)
    }

    /// Similarity search over short-term memory
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.stm.search(query, k)
    }

    /// Filtered similarity search over long-term memory
    pub fn search_ltm(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.ltm.search(query, k, filter)
    }

    /// Copy a short-term item into long-term memory under `embedding`
    ///
    /// Returns `Ok(false)` when the id is not resident in short-term memory;
    /// long-term memory is not touched in that case. The short-term copy
    /// stays where it is and its recency is not refreshed.
    pub fn promote(&self, id: &str, embedding: Vec<f32>) -> Result<bool> {
        let _serial = self.promotion.lock().map_err(poisoned)?;

        let Some(source) = self.stm.peek(id)? else {
            warn!(id = %id, "Promotion source missing from short-term memory");
            return Ok(false);
        };

        self.ltm.add(source.reembedded(embedding))?;
        debug!(id = %id, "Promoted item to long-term memory");

        Ok(true)
    }

    /// Pass-through to long-term `get`
    pub fn get_from_ltm(&self, id: &str) -> Result<Option<MemoryItem>> {
        self.ltm.get(id)
    }

    /// Pass-through to long-term `delete`
    pub fn delete_from_ltm(&self, id: &str) -> Result<bool> {
        self.ltm.delete(id)
    }
}
