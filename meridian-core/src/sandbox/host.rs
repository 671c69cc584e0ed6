//! Memory access exposed to agent scripts.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::graph::LinkGraph;
use crate::memory::{Chunk, ChunkFilter, ChunkId, ChunkStore, LinkType};
use crate::operations::search::{search, SearchHit, SearchOptions};

/// The memory primitives a session can call.
pub trait MemoryHost: Send + Sync {
    fn read_chunk(&self, id: &ChunkId) -> Result<Option<Chunk>>;

    fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Ids carrying every tag in `tags`.
    fn list_chunks_by_tag(&self, tags: &[String]) -> Result<Vec<ChunkId>>;

    /// Outgoing neighbours, optionally restricted to one edge type.
    fn get_linked_chunks(&self, id: &ChunkId, link_type: Option<LinkType>)
        -> Result<Vec<ChunkId>>;
}

/// [`MemoryHost`] over a chunk store and its link graph.
#[derive(Clone)]
pub struct StoreHost {
    store: Arc<ChunkStore>,
    graph: Arc<LinkGraph>,
    synonyms: BTreeMap<String, Vec<String>>,
    conversation_id: Option<String>,
    min_confidence: f64,
}

impl StoreHost {
    pub fn new(store: Arc<ChunkStore>, graph: Arc<LinkGraph>) -> Self {
        Self {
            store,
            graph,
            synonyms: crate::config::default_synonyms(),
            conversation_id: None,
            min_confidence: 0.0,
        }
    }

    pub fn with_synonyms(mut self, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Restrict searches to one conversation.
    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

impl MemoryHost for StoreHost {
    fn read_chunk(&self, id: &ChunkId) -> Result<Option<Chunk>> {
        self.store.get_chunk(id)
    }

    fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let options = SearchOptions::default()
            .with_limit(limit)
            .with_conversation(self.conversation_id.clone())
            .with_min_confidence(self.min_confidence);
        search(&self.store, query, &self.synonyms, &options)
    }

    fn list_chunks_by_tag(&self, tags: &[String]) -> Result<Vec<ChunkId>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .list_chunks(&ChunkFilter::new().tags(tags.iter().cloned()))
    }

    fn get_linked_chunks(
        &self,
        id: &ChunkId,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ChunkId>> {
        self.graph.get_outgoing(id, link_type)
    }
}

/// Dict a script sees from `read_chunk`.
pub fn chunk_to_value(chunk: &Chunk) -> Value {
    json!({
        "id": chunk.id.as_str(),
        "content": chunk.content,
        "type": chunk.chunk_type.as_str(),
        "tags": chunk.tags,
        "confidence": chunk.confidence(),
        "conversation_id": chunk.conversation_id(),
        "created": chunk.metadata.created.to_rfc3339(),
        "token_count": chunk.token_count,
        "links": serde_json::to_value(&chunk.links).unwrap_or(Value::Null),
    })
}

/// Dict a script sees for each `search_chunks` match.
pub fn hit_to_value(hit: &SearchHit) -> Value {
    json!({
        "id": hit.id.as_str(),
        "content": hit.content,
        "score": hit.score,
        "tags": hit.tags,
        "confidence": hit.confidence,
    })
}

pub fn ids_to_value(ids: &[ChunkId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AutoLinker;
    use crate::memory::{ChunkType, NewChunk};
    use tempfile::TempDir;

    fn host() -> (TempDir, StoreHost, Vec<ChunkId>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).unwrap());
        let graph = Arc::new(LinkGraph::in_memory());
        let linker = AutoLinker::new(store.clone(), graph.clone());
        let a = linker
            .create_chunk_with_links(
                NewChunk::new("User prefers VS Code", ChunkType::Preference, "conv-1", 5)
                    .with_tags(["preference", "editor"]),
            )
            .unwrap();
        let b = linker
            .create_chunk_with_links(
                NewChunk::new("User likes dark mode", ChunkType::Preference, "conv-1", 5)
                    .with_tags(["preference", "ui"]),
            )
            .unwrap();
        (dir, StoreHost::new(store, graph), vec![a.id, b.id])
    }

    #[test]
    fn test_read_chunk_value_shape() {
        let (_dir, host, ids) = host();
        let chunk = host.read_chunk(&ids[0]).unwrap().unwrap();
        let value = chunk_to_value(&chunk);

        assert_eq!(value["content"], "User prefers VS Code");
        assert_eq!(value["type"], "preference");
        assert_eq!(value["tags"], json!(["preference", "editor"]));
        assert!(value["links"]["context_of"].is_array());
        assert!(host.read_chunk(&ChunkId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn test_tag_listing_is_conjunctive() {
        let (_dir, host, ids) = host();
        let both = host.list_chunks_by_tag(&["preference".to_string()]).unwrap();
        assert_eq!(both, ids);

        let one = host
            .list_chunks_by_tag(&["preference".to_string(), "ui".to_string()])
            .unwrap();
        assert_eq!(one, vec![ids[1].clone()]);
        assert!(host.list_chunks_by_tag(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_linked_chunks_follow_graph() {
        let (_dir, host, ids) = host();
        let linked = host
            .get_linked_chunks(&ids[0], Some(LinkType::ContextOf))
            .unwrap();
        assert_eq!(linked, vec![ids[1].clone()]);
    }

    #[test]
    fn test_search_respects_conversation_scope() {
        let (_dir, host, _) = host();
        assert_eq!(host.search_chunks("editor", 5).unwrap().len(), 1);

        let scoped = host.with_conversation(Some("conv-2".into()));
        assert!(scoped.search_chunks("editor", 5).unwrap().is_empty());
    }
}
