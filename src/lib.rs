//! # Tiered Memory
//!
//! A two-tier embedding memory for AI agents.
//!
//! ## Architecture
//!
//! - **Short-term memory** - a capacity-bounded cache that evicts the least
//!   recently used item and supports nearest-neighbor search
//! - **Long-term memory** - an unbounded store with exact-match metadata
//!   filtering combined with similarity search
//! - **Memory manager** - owns both tiers and promotes items from the short
//!   term into the long term
//!
//! Embeddings are supplied by the caller; nothing here computes them.
//!
//! ## Usage
//!
//! ```rust
//! use tiered_memory::{LongTermMemory, MemoryItem, MemoryManager, ShortTermMemory};
//!
//! # fn main() -> tiered_memory::Result<()> {
//! let manager = MemoryManager::new(
//!     ShortTermMemory::with_dimensionality(10, 3)?,
//!     LongTermMemory::new(3)?,
//! );
//!
//! manager.add(MemoryItem::new("1", "rust programming", vec![1.0, 0.0, 0.0]))?;
//! assert!(manager.promote("1", vec![1.0, 0.0, 0.0])?);
//!
//! let hits = manager.search_ltm(&[1.0, 0.0, 0.0], 5, None)?;
//! assert_eq!(hits[0].item.content, "rust programming");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod item;
pub mod ltm;
pub mod manager;
pub mod similarity;
pub mod stm;
pub mod storage;
pub mod trace;

pub use config::Config;
pub use error::{Error, Result};
pub use item::{MemoryItem, Metadata, MetadataFilter, SearchHit};
pub use ltm::LongTermMemory;
pub use manager::MemoryManager;
pub use stm::ShortTermMemory;
pub use storage::{MemoryFeedback, SqliteStorage};
pub use trace::{Operation, Scenario, Trace, TraceReport};
