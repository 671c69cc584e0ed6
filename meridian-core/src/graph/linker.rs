//! Automatic and manual link generation.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::index::LinkGraph;
use crate::error::Result;
use crate::memory::{Chunk, ChunkFilter, ChunkId, ChunkStore, LinkType, NewChunk};

/// Default look-back window for `follows` links.
pub const DEFAULT_TEMPORAL_WINDOW_MINUTES: i64 = 5;

/// An explicit `contradicts` edge found among a set of chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub source: ChunkId,
    pub target: ChunkId,
    pub reasoning: String,
}

/// Generates links when chunks are created.
///
/// Three passes run against each new chunk:
/// - `context_of` to every chunk of the same conversation, both ways
/// - `follows` to same-conversation chunks created within the window before it
/// - `related_to` to every chunk sharing a tag, both ways, unless already `context_of`
pub struct AutoLinker {
    store: Arc<ChunkStore>,
    graph: Arc<LinkGraph>,
    temporal_window: Duration,
}

impl AutoLinker {
    pub fn new(store: Arc<ChunkStore>, graph: Arc<LinkGraph>) -> Self {
        Self {
            store,
            graph,
            temporal_window: Duration::minutes(DEFAULT_TEMPORAL_WINDOW_MINUTES),
        }
    }

    pub fn with_temporal_window_minutes(mut self, minutes: i64) -> Self {
        self.temporal_window = Duration::minutes(minutes);
        self
    }

    pub fn graph(&self) -> &Arc<LinkGraph> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Link a freshly created chunk to its neighbours and persist every change.
    #[instrument(skip(self, chunk), fields(id = %chunk.id))]
    pub fn link_on_create(&self, mut chunk: Chunk) -> Result<Chunk> {
        let id = chunk.id.clone();
        let conversation = chunk.metadata.conversation_id.clone();
        let created = chunk.metadata.created;

        let context = self.exclude(
            self.store
                .list_chunks(&ChunkFilter::new().conversation(conversation.clone()))?,
            &id,
        );
        for target in &context {
            if chunk.links.push(LinkType::ContextOf, target.clone()) {
                self.graph.add_link(&id, target, LinkType::ContextOf)?;
                self.add_back_link(target, &id, LinkType::ContextOf)?;
            }
        }

        let predecessors = self.exclude(
            self.store.list_chunks(
                &ChunkFilter::new()
                    .conversation(conversation)
                    .created_after(created - self.temporal_window)
                    .created_before(created),
            )?,
            &id,
        );
        for target in &predecessors {
            if chunk.links.push(LinkType::Follows, target.clone()) {
                self.graph.add_link(&id, target, LinkType::Follows)?;
            }
        }

        let related = self.tag_related(&chunk)?;
        for target in &related {
            if chunk.links.contains(LinkType::ContextOf, target) {
                continue;
            }
            if chunk.links.push(LinkType::RelatedTo, target.clone()) {
                self.graph.add_link(&id, target, LinkType::RelatedTo)?;
                self.add_back_link(target, &id, LinkType::RelatedTo)?;
            }
        }

        self.store.save_chunk(&chunk)?;

        info!(
            context = context.len(),
            follows = predecessors.len(),
            related = related.len(),
            "Auto-linked chunk"
        );
        Ok(chunk)
    }

    /// Create a chunk and link it in one step.
    pub fn create_chunk_with_links(&self, new: NewChunk) -> Result<Chunk> {
        let chunk = self.store.create_chunk(new)?;
        self.link_on_create(chunk)
    }

    /// Add a `supports` or `contradicts` edge by hand.
    ///
    /// Returns `Ok(false)` when the type is not a manual type or the source
    /// chunk does not exist.
    pub fn add_manual_link(
        &self,
        from: &ChunkId,
        to: &ChunkId,
        link_type: LinkType,
        reason: Option<&str>,
    ) -> Result<bool> {
        if !link_type.is_manual() {
            warn!(link_type = %link_type, "Unknown manual link type");
            return Ok(false);
        }
        let Some(mut source) = self.store.get_chunk(from)? else {
            warn!(from = %from, "Source chunk not found");
            return Ok(false);
        };

        if source.links.push(link_type, to.clone()) {
            self.store.save_chunk(&source)?;
        }
        self.graph.add_link(from, to, link_type)?;

        info!(from = %from, to = %to, link_type = %link_type, reason = reason.unwrap_or(""), "Added manual link");
        Ok(true)
    }

    /// Explicit `contradicts` edges leaving any of `ids`.
    pub fn find_contradictions(&self, ids: &[ChunkId]) -> Result<Vec<Contradiction>> {
        let mut found = Vec::new();
        for id in ids {
            let Some(chunk) = self.store.get_chunk(id)? else {
                continue;
            };
            for target in &chunk.links.contradicts {
                found.push(Contradiction {
                    source: chunk.id.clone(),
                    target: target.clone(),
                    reasoning: "Explicit contradiction link".to_string(),
                });
            }
        }
        Ok(found)
    }

    fn exclude(&self, ids: Vec<ChunkId>, id: &ChunkId) -> Vec<ChunkId> {
        ids.into_iter().filter(|other| other != id).collect()
    }

    fn tag_related(&self, chunk: &Chunk) -> Result<Vec<ChunkId>> {
        let mut related: Vec<ChunkId> = Vec::new();
        for tag in &chunk.tags {
            for other in self.store.ids_for_tag(tag)? {
                if other != chunk.id && !related.contains(&other) {
                    related.push(other);
                }
            }
        }
        Ok(related)
    }

    fn add_back_link(&self, target: &ChunkId, new_id: &ChunkId, link_type: LinkType) -> Result<()> {
        let Some(mut existing) = self.store.get_chunk(target)? else {
            warn!(target = %target, "Link target vanished");
            return Ok(());
        };
        if existing.links.push(link_type, new_id.clone()) {
            self.store.save_chunk(&existing)?;
            self.graph.add_link(target, new_id, link_type)?;
        }
        Ok(())
    }
}

/// Strength of an edge between two chunks, in `[0, 1]`.
pub fn calculate_link_strength(source: &Chunk, target: &Chunk, link_type: LinkType) -> f64 {
    match link_type {
        LinkType::ContextOf => 1.0,
        LinkType::Follows => {
            let delta = source.metadata.created - target.metadata.created;
            let minutes = (delta.num_milliseconds() as f64 / 60_000.0).abs();
            (1.0 - minutes / 5.0).max(0.3)
        }
        LinkType::RelatedTo => {
            let shared = source.shared_tag_count(target) as f64;
            (0.3 + shared * 0.2).min(0.9)
        }
        LinkType::Supports | LinkType::Contradicts => 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChunkType;
    use chrono::Utc;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ChunkStore>,
        linker: AutoLinker,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).unwrap());
        let graph = Arc::new(
            LinkGraph::open(dir.path().join("index").join("link_graph_index.json")).unwrap(),
        );
        let linker = AutoLinker::new(store.clone(), graph);
        Fixture {
            _dir: dir,
            store,
            linker,
        }
    }

    fn note(content: &str, conv: &str) -> NewChunk {
        NewChunk::new(content, ChunkType::Note, conv, 4)
    }

    #[test]
    fn test_context_links_are_bidirectional() {
        let f = fixture();
        let a = f.linker.create_chunk_with_links(note("first", "conv-1")).unwrap();
        let b = f.linker.create_chunk_with_links(note("second", "conv-1")).unwrap();

        assert_eq!(b.links.context_of, vec![a.id.clone()]);
        let a = f.store.get_chunk(&a.id).unwrap().unwrap();
        assert_eq!(a.links.context_of, vec![b.id.clone()]);

        let graph = f.linker.graph();
        assert_eq!(
            graph.get_outgoing(&a.id, Some(LinkType::ContextOf)).unwrap(),
            vec![b.id.clone()]
        );
        assert_eq!(
            graph.get_outgoing(&b.id, Some(LinkType::ContextOf)).unwrap(),
            vec![a.id.clone()]
        );
    }

    #[test]
    fn test_follows_respects_window() {
        let f = fixture();
        let now = Utc::now();
        let old = f
            .linker
            .create_chunk_with_links(note("old", "c").with_created(now - Duration::minutes(10)))
            .unwrap();
        let recent = f
            .linker
            .create_chunk_with_links(note("recent", "c").with_created(now - Duration::minutes(3)))
            .unwrap();
        let newest = f
            .linker
            .create_chunk_with_links(note("newest", "c").with_created(now))
            .unwrap();

        assert_eq!(newest.links.follows, vec![recent.id.clone()]);
        assert!(recent.links.follows.is_empty());

        // follows is one-way
        let recent = f.store.get_chunk(&recent.id).unwrap().unwrap();
        assert!(recent.links.follows.is_empty());
        assert!(!newest.links.follows.contains(&old.id));
    }

    #[test]
    fn test_tag_pass_skips_context_matches() {
        let f = fixture();
        let same_conv = f
            .linker
            .create_chunk_with_links(note("a", "c1").with_tags(["editor"]))
            .unwrap();
        let other_conv = f
            .linker
            .create_chunk_with_links(note("b", "c2").with_tags(["editor"]))
            .unwrap();
        let new = f
            .linker
            .create_chunk_with_links(note("c", "c1").with_tags(["editor"]))
            .unwrap();

        assert_eq!(new.links.context_of, vec![same_conv.id.clone()]);
        assert_eq!(new.links.related_to, vec![other_conv.id.clone()]);
        for id in &new.links.related_to {
            assert!(!new.links.context_of.contains(id));
        }

        let other = f.store.get_chunk(&other_conv.id).unwrap().unwrap();
        assert!(other.links.related_to.contains(&new.id));
    }

    #[test]
    fn test_manual_links() {
        let f = fixture();
        let a = f.linker.create_chunk_with_links(note("a", "c1")).unwrap();
        let b = f.linker.create_chunk_with_links(note("b", "c2")).unwrap();

        assert!(f
            .linker
            .add_manual_link(&a.id, &b.id, LinkType::Contradicts, Some("disagree"))
            .unwrap());
        assert!(!f
            .linker
            .add_manual_link(&a.id, &b.id, LinkType::Follows, None)
            .unwrap());
        assert!(!f
            .linker
            .add_manual_link(&"chunk-missing".into(), &b.id, LinkType::Supports, None)
            .unwrap());

        let stored = f.store.get_chunk(&a.id).unwrap().unwrap();
        assert_eq!(stored.links.contradicts, vec![b.id.clone()]);

        let found = f.linker.find_contradictions(&[a.id.clone(), b.id.clone()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, a.id);
        assert_eq!(found[0].target, b.id);
    }

    #[test]
    fn test_link_strength() {
        let f = fixture();
        let now = Utc::now();
        let a = f
            .store
            .create_chunk(note("a", "c").with_tags(["x", "y"]).with_created(now))
            .unwrap();
        let b = f
            .store
            .create_chunk(
                note("b", "c")
                    .with_tags(["x", "y", "z"])
                    .with_created(now - Duration::minutes(2)),
            )
            .unwrap();
        let far = f
            .store
            .create_chunk(note("far", "c").with_created(now - Duration::minutes(30)))
            .unwrap();

        assert_eq!(calculate_link_strength(&a, &b, LinkType::ContextOf), 1.0);
        assert!((calculate_link_strength(&a, &b, LinkType::Follows) - 0.6).abs() < 1e-9);
        assert_eq!(calculate_link_strength(&a, &far, LinkType::Follows), 0.3);
        assert!((calculate_link_strength(&a, &b, LinkType::RelatedTo) - 0.7).abs() < 1e-9);
        assert!((calculate_link_strength(&a, &far, LinkType::RelatedTo) - 0.3).abs() < 1e-9);
        assert_eq!(calculate_link_strength(&a, &b, LinkType::Supports), 0.8);
        assert_eq!(calculate_link_strength(&a, &b, LinkType::Contradicts), 0.8);
    }
}
