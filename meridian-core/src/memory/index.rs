//! Secondary index over the chunk files.
//!
//! Tag and conversation lookups plus a creation-ordered id list, persisted as
//! `index/chunk_index.json` and kept in step with every chunk creation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Chunk, ChunkId};
use crate::error::{Error, Result};

/// One entry in the creation-ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: ChunkId,
    pub created: DateTime<Utc>,
}

/// Tag, conversation, and creation-order lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    tags: HashMap<String, Vec<ChunkId>>,
    conversations: HashMap<String, Vec<ChunkId>>,
    order: Vec<OrderEntry>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a set of chunks, ordering by creation time then id.
    pub fn rebuild<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Self {
        let mut sorted: Vec<&Chunk> = chunks.into_iter().collect();
        sorted.sort_by(|a, b| {
            a.metadata
                .created
                .cmp(&b.metadata.created)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut index = Self::new();
        for chunk in sorted {
            index.insert(chunk);
        }
        index
    }

    /// Record a newly created chunk. Re-inserting a known id is a no-op.
    pub fn insert(&mut self, chunk: &Chunk) {
        if self.contains(&chunk.id) {
            return;
        }
        for tag in &chunk.tags {
            push_unique(self.tags.entry(tag.clone()).or_default(), &chunk.id);
        }
        push_unique(
            self.conversations
                .entry(chunk.metadata.conversation_id.clone())
                .or_default(),
            &chunk.id,
        );
        self.order.push(OrderEntry {
            id: chunk.id.clone(),
            created: chunk.metadata.created,
        });
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.order.iter().any(|e| &e.id == id)
    }

    pub fn ids_for_tag(&self, tag: &str) -> &[ChunkId] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids_for_conversation(&self, conversation_id: &str) -> &[ChunkId] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All entries in creation order.
    pub fn ordered(&self) -> &[OrderEntry] {
        &self.order
    }

    /// Position of `id` in creation order.
    pub fn position(&self, id: &ChunkId) -> Option<usize> {
        self.order.iter().position(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Serialization)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::Serialization)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json)
            .map_err(|e| Error::storage(format!("Failed to save chunk index: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("Failed to load chunk index: {}", e)))?;
        Self::from_json(&json)
    }
}

fn push_unique(list: &mut Vec<ChunkId>, id: &ChunkId) {
    if !list.contains(id) {
        list.push(id.clone());
    }
}
