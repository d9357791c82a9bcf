//! The unit of storage shared by both memory tiers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Exact-match metadata attached to an item
pub type Metadata = BTreeMap<String, String>;

/// Required key/value pairs for a filtered search
pub type MetadataFilter = BTreeMap<String, String>;

/// An embedded item held by short-term or long-term memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Caller-assigned identifier, unique within a store
    pub id: String,

    /// Opaque payload, stored verbatim
    pub content: String,

    /// Embedding vector; its length must match the store's dimensionality
    pub embedding: Vec<f32>,

    /// Metadata used only for filtering, never for similarity
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Metadata,

    /// When this item value was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When this item value was last rewritten
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    /// Create a new item with empty metadata
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy this item under a new embedding, keeping identity and content
    pub fn reembedded(&self, embedding: Vec<f32>) -> Self {
        Self {
            id: self.id.clone(),
            content: self.content.clone(),
            embedding,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Length of the embedding
    pub fn dimensionality(&self) -> usize {
        self.embedding.len()
    }

    /// Whether every filter pair is present in the metadata with the same value
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// A search result: the matched item and its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f32,
}

impl SearchHit {
    pub fn id(&self) -> &str {
        &self.item.id
    }
}

pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_creation() {
        let item = MemoryItem::new("1", "rust programming", vec![1.0, 0.0, 0.0]);

        assert_eq!(item.id, "1");
        assert_eq!(item.content, "rust programming");
        assert_eq!(item.dimensionality(), 3);
        assert!(item.metadata.is_empty());
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn test_filter_matching() {
        let item = MemoryItem::new("1", "rust content", vec![1.0, 0.0, 0.0])
            .with_tag("tag", "rust")
            .with_tag("type", "code");

        let mut filter = MetadataFilter::new();
        assert!(item.matches(&filter));

        filter.insert("tag".into(), "rust".into());
        assert!(item.matches(&filter));

        filter.insert("type".into(), "code".into());
        assert!(item.matches(&filter));

        filter.insert("type".into(), "prose".into());
        assert!(!item.matches(&filter));

        let mut missing = MetadataFilter::new();
        missing.insert("lang".into(), "en".into());
        assert!(!item.matches(&missing));
    }

    #[test]
    fn test_deserialize_without_timestamps_or_metadata() {
        let item: MemoryItem = serde_json::from_str(
            r#"{"id": "1", "content": "first", "embedding": [1.0, 0.0, 0.0], "metadata": null}"#,
        )
        .unwrap();

        assert_eq!(item.id, "1");
        assert!(item.metadata.is_empty());

        let item: MemoryItem =
            serde_json::from_str(r#"{"id": "2", "content": "second", "embedding": [0.0]}"#)
                .unwrap();
        assert!(item.metadata.is_empty());
    }

    #[test]
    fn test_reembedded_keeps_identity() {
        let item = MemoryItem::new("1", "test", vec![1.0, 0.0]).with_tag("tag", "a");
        let copy = item.reembedded(vec![0.0, 1.0]);

        assert_eq!(copy.id, item.id);
        assert_eq!(copy.content, item.content);
        assert_eq!(copy.metadata, item.metadata);
        assert_eq!(copy.embedding, vec![0.0, 1.0]);
        assert_eq!(copy.created_at, item.created_at);
    }
}
