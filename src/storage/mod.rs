//! Storage backends for tiered-memory

mod sqlite;

pub use sqlite::{MemoryFeedback, SqliteStorage};
