//! Keyword search with synonym expansion.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::memory::{Chunk, ChunkFilter, ChunkId, ChunkStore};

/// A scored search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub content: String,
    pub score: usize,
    pub tags: Vec<String>,
    pub confidence: f64,
}

impl SearchHit {
    fn new(chunk: Chunk, score: usize) -> Self {
        Self {
            confidence: chunk.confidence(),
            id: chunk.id,
            content: chunk.content,
            score,
            tags: chunk.tags,
        }
    }
}

/// Search scope and cut-offs.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub conversation_id: Option<String>,
    pub limit: usize,
    pub min_confidence: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            limit: 10,
            min_confidence: 0.0,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

/// Lowercased query terms plus every synonym group any of them belongs to.
pub fn expand_query(query: &str, synonyms: &BTreeMap<String, Vec<String>>) -> BTreeSet<String> {
    let lowered = query.to_lowercase();
    let terms: BTreeSet<String> = lowered.split_whitespace().map(str::to_string).collect();

    let mut expanded = terms.clone();
    for term in &terms {
        for (key, group) in synonyms {
            if term == key || group.iter().any(|s| s == term) {
                expanded.extend(group.iter().map(|s| s.to_lowercase()));
            }
        }
    }
    expanded
}

/// Terms found in the lowercased content, plus terms naming one of the tags.
pub fn score_chunk(chunk: &Chunk, terms: &BTreeSet<String>) -> usize {
    let content = chunk.content.to_lowercase();
    let in_content = terms.iter().filter(|t| content.contains(t.as_str())).count();
    let in_tags = terms
        .iter()
        .filter(|t| chunk.tags.iter().any(|tag| tag.to_lowercase() == **t))
        .count();
    in_content + in_tags
}

/// Score every candidate chunk and return the best `limit`, highest first.
/// Ties keep creation order.
pub fn search(
    store: &ChunkStore,
    query: &str,
    synonyms: &BTreeMap<String, Vec<String>>,
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let terms = expand_query(query, synonyms);
    if terms.is_empty() || options.limit == 0 {
        return Ok(Vec::new());
    }

    let mut filter = ChunkFilter::new();
    if let Some(conv) = &options.conversation_id {
        filter = filter.conversation(conv.clone());
    }

    let mut hits = Vec::new();
    for id in store.list_chunks(&filter)? {
        let Some(chunk) = store.get_chunk(&id)? else {
            continue;
        };
        if chunk.confidence() < options.min_confidence {
            continue;
        }
        let score = score_chunk(&chunk, &terms);
        if score > 0 {
            hits.push(SearchHit::new(chunk, score));
        }
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(options.limit);
    debug!(query, terms = terms.len(), hits = hits.len(), "Search complete");
    Ok(hits)
}
