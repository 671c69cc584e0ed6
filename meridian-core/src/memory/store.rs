//! File-backed chunk store.
//!
//! Layout under the store root:
//!
//! ```text
//! chunks/<id>.json          one record per chunk
//! index/chunk_index.json    tag / conversation / creation-order index
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::index::ChunkIndex;
use super::types::{normalize_tags, Chunk, ChunkId, ChunkLinks, ChunkMetadata, ChunkType};
use crate::error::{Error, Result};

/// Confidence assigned when the caller gives none.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

const CHUNKS_DIR: &str = "chunks";
const INDEX_DIR: &str = "index";
const INDEX_FILE: &str = "chunk_index.json";

/// Parameters for a new chunk.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub chunk_type: ChunkType,
    pub conversation_id: String,
    pub token_count: u32,
    pub tags: Vec<String>,
    pub confidence: Option<f64>,
    /// Creation time override; defaults to now
    pub created: Option<DateTime<Utc>>,
}

impl NewChunk {
    pub fn new(
        content: impl Into<String>,
        chunk_type: ChunkType,
        conversation_id: impl Into<String>,
        token_count: u32,
    ) -> Self {
        Self {
            content: content.into(),
            chunk_type,
            conversation_id: conversation_id.into(),
            token_count,
            tags: Vec::new(),
            confidence: None,
            created: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }
}

/// Filter for [`ChunkStore::list_chunks`]. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub tags: Vec<String>,
    pub conversation_id: Option<String>,
    /// Inclusive lower bound
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub created_before: Option<DateTime<Utc>>,
}

impl ChunkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub by_type: BTreeMap<ChunkType, usize>,
    pub total_tags: usize,
}

/// Durable chunk storage with a secondary index.
///
/// Methods take `&self`; the index sits behind a mutex so the store can be
/// shared through an `Arc`. One writer per directory is assumed.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
    index: Arc<Mutex<ChunkIndex>>,
}

impl ChunkStore {
    /// Open or create a store rooted at `root`.
    ///
    /// A missing or unreadable index is rebuilt from the chunk files.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(CHUNKS_DIR))?;
        fs::create_dir_all(root.join(INDEX_DIR))?;

        let index_path = root.join(INDEX_DIR).join(INDEX_FILE);
        let index = match ChunkIndex::load(&index_path) {
            Ok(index) => index,
            Err(e) => {
                if index_path.exists() {
                    warn!(error = %e, "Chunk index unreadable, rebuilding");
                }
                let chunks = read_chunk_files(&root.join(CHUNKS_DIR));
                let index = ChunkIndex::rebuild(chunks.iter());
                index.save(&index_path)?;
                info!(chunks = index.len(), "Rebuilt chunk index");
                index
            }
        };

        Ok(Self {
            root,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.root.join(CHUNKS_DIR).join(format!("{}.json", id))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_DIR).join(INDEX_FILE)
    }

    fn with_index<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ChunkIndex) -> Result<T>,
    {
        let mut index = self
            .index
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock chunk index: {}", e)))?;
        f(&mut index)
    }

    /// Create and persist a chunk. Links start empty.
    #[instrument(skip(self, new), fields(conversation = %new.conversation_id))]
    pub fn create_chunk(&self, new: NewChunk) -> Result<Chunk> {
        if new.content.trim().is_empty() {
            return Err(Error::invalid_input("chunk content must not be empty"));
        }
        let confidence = new.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::invalid_input(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }

        let chunk = Chunk {
            id: ChunkId::new(),
            content: new.content,
            token_count: new.token_count,
            chunk_type: new.chunk_type,
            tags: normalize_tags(&new.tags),
            metadata: ChunkMetadata {
                created: new.created.unwrap_or_else(Utc::now),
                conversation_id: new.conversation_id,
                confidence,
            },
            links: ChunkLinks::default(),
        };

        let index_path = self.index_path();
        self.with_index(|index| {
            self.write_chunk(&chunk)?;
            index.insert(&chunk);
            index.save(&index_path)
        })?;

        debug!(id = %chunk.id, chunk_type = %chunk.chunk_type, "Created chunk");
        Ok(chunk)
    }

    /// Read a chunk from disk. Unknown ids yield `None`.
    pub fn get_chunk(&self, id: &ChunkId) -> Result<Option<Chunk>> {
        if !id.is_path_safe() {
            return Ok(None);
        }
        let path = self.chunk_path(id);
        match fs::read_to_string(&path) {
            Ok(json) => Chunk::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Rewrite an existing chunk record.
    pub fn save_chunk(&self, chunk: &Chunk) -> Result<()> {
        if !self.contains(&chunk.id)? {
            return Err(Error::invalid_input(format!(
                "cannot save unknown chunk {}",
                chunk.id
            )));
        }
        self.write_chunk(chunk)
    }

    fn write_chunk(&self, chunk: &Chunk) -> Result<()> {
        if !chunk.id.is_path_safe() {
            return Err(Error::invalid_input(format!("unsafe chunk id {}", chunk.id)));
        }
        let json = chunk.to_json()?;
        fs::write(self.chunk_path(&chunk.id), json)
            .map_err(|e| Error::storage(format!("Failed to write chunk {}: {}", chunk.id, e)))
    }

    pub fn contains(&self, id: &ChunkId) -> Result<bool> {
        self.with_index(|index| Ok(index.contains(id)))
    }

    /// Ids matching every set field of `filter`, in creation order.
    pub fn list_chunks(&self, filter: &ChunkFilter) -> Result<Vec<ChunkId>> {
        self.with_index(|index| {
            let ids = index
                .ordered()
                .iter()
                .filter(|entry| {
                    filter
                        .created_after
                        .map_or(true, |after| entry.created >= after)
                        && filter
                            .created_before
                            .map_or(true, |before| entry.created < before)
                })
                .filter(|entry| {
                    filter.conversation_id.as_deref().map_or(true, |conv| {
                        index.ids_for_conversation(conv).contains(&entry.id)
                    })
                })
                .filter(|entry| {
                    filter
                        .tags
                        .iter()
                        .all(|tag| index.ids_for_tag(tag).contains(&entry.id))
                })
                .map(|entry| entry.id.clone())
                .collect();
            Ok(ids)
        })
    }

    /// Ids carrying `tag`, in the order they were tagged.
    pub fn ids_for_tag(&self, tag: &str) -> Result<Vec<ChunkId>> {
        self.with_index(|index| Ok(index.ids_for_tag(tag).to_vec()))
    }

    /// Position of `id` in creation order.
    pub fn position(&self, id: &ChunkId) -> Result<Option<usize>> {
        self.with_index(|index| Ok(index.position(id)))
    }

    /// Every readable chunk in creation order.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let ids = self.list_chunks(&ChunkFilter::default())?;
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_chunk(&id) {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => warn!(id = %id, "Indexed chunk has no file"),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable chunk"),
            }
        }
        Ok(chunks)
    }

    pub fn len(&self) -> Result<usize> {
        self.with_index(|index| Ok(index.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let total_tags = self.with_index(|index| Ok(index.tag_count()))?;
        let mut stats = StoreStats {
            total_tags,
            ..Default::default()
        };
        for chunk in self.all_chunks()? {
            stats.total_chunks += 1;
            *stats.by_type.entry(chunk.chunk_type).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

fn read_chunk_files(dir: &Path) -> Vec<Chunk> {
    let pattern = dir.join("*.json");
    let paths = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(error = %e, "Invalid chunk glob");
            return Vec::new();
        }
    };

    paths
        .filter_map(|entry| entry.ok())
        .filter_map(|path| {
            let json = fs::read_to_string(&path).ok()?;
            match Chunk::from_json(&json) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed chunk file");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = store();
        let chunk = store
            .create_chunk(
                NewChunk::new("User prefers VS Code", ChunkType::Preference, "conv-1", 5)
                    .with_tags(["editor", "tools", "editor"]),
            )
            .unwrap();

        assert!(chunk.id.as_str().starts_with("chunk-"));
        assert_eq!(chunk.tags, vec!["editor", "tools"]);
        assert_eq!(chunk.confidence(), DEFAULT_CONFIDENCE);
        assert!(chunk.links.is_empty());

        let loaded = store.get_chunk(&chunk.id).unwrap().unwrap();
        assert_eq!(loaded, chunk);
        assert!(store.get_chunk(&"chunk-missing".into()).unwrap().is_none());
        assert!(store.get_chunk(&"../escape".into()).unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_invalid_input() {
        let (_dir, store) = store();
        let empty = NewChunk::new("   ", ChunkType::Note, "c", 0);
        assert!(matches!(
            store.create_chunk(empty),
            Err(Error::InvalidInput(_))
        ));

        let bad = NewChunk::new("x", ChunkType::Note, "c", 1).with_confidence(1.2);
        assert!(store.create_chunk(bad).is_err());

        let nan = NewChunk::new("x", ChunkType::Note, "c", 1).with_confidence(f64::NAN);
        assert!(store.create_chunk(nan).is_err());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_list_chunks_filters() {
        let (_dir, store) = store();
        let base = Utc::now() - Duration::minutes(30);
        let a = store
            .create_chunk(
                NewChunk::new("a", ChunkType::Note, "c1", 1)
                    .with_tags(["x", "y"])
                    .with_created(base),
            )
            .unwrap();
        let b = store
            .create_chunk(
                NewChunk::new("b", ChunkType::Fact, "c1", 1)
                    .with_tags(["x"])
                    .with_created(base + Duration::minutes(2)),
            )
            .unwrap();
        let c = store
            .create_chunk(
                NewChunk::new("c", ChunkType::Note, "c2", 1)
                    .with_tags(["y"])
                    .with_created(base + Duration::minutes(4)),
            )
            .unwrap();

        let all = store.list_chunks(&ChunkFilter::new()).unwrap();
        assert_eq!(all, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let xy = store.list_chunks(&ChunkFilter::new().tags(["x", "y"])).unwrap();
        assert_eq!(xy, vec![a.id.clone()]);

        let conv = store.list_chunks(&ChunkFilter::new().conversation("c1")).unwrap();
        assert_eq!(conv, vec![a.id.clone(), b.id.clone()]);

        // Lower bound inclusive, upper bound exclusive.
        let window = store
            .list_chunks(
                &ChunkFilter::new()
                    .created_after(base + Duration::minutes(2))
                    .created_before(base + Duration::minutes(4)),
            )
            .unwrap();
        assert_eq!(window, vec![b.id.clone()]);
    }

    #[test]
    fn test_save_chunk_requires_existing() {
        let (_dir, store) = store();
        let mut chunk = store
            .create_chunk(NewChunk::new("a", ChunkType::Note, "c1", 1))
            .unwrap();
        chunk.links.push(crate::memory::LinkType::Supports, "chunk-x".into());
        store.save_chunk(&chunk).unwrap();
        let loaded = store.get_chunk(&chunk.id).unwrap().unwrap();
        assert_eq!(loaded.links.supports.len(), 1);

        let mut stranger = chunk.clone();
        stranger.id = "chunk-stranger".into();
        assert!(store.save_chunk(&stranger).is_err());
    }

    #[test]
    fn test_reopen_rebuilds_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ChunkStore::open(dir.path()).unwrap();
            store
                .create_chunk(NewChunk::new("a", ChunkType::Note, "c1", 1).with_tags(["t"]))
                .unwrap()
                .id
        };

        fs::remove_file(dir.path().join("index").join("chunk_index.json")).unwrap();
        let reopened = ChunkStore::open(dir.path()).unwrap();
        assert_eq!(reopened.ids_for_tag("t").unwrap(), vec![id]);

        fs::write(dir.path().join("index").join("chunk_index.json"), "{not json").unwrap();
        let reopened = ChunkStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = store();
        store
            .create_chunk(NewChunk::new("a", ChunkType::Note, "c1", 1))
            .unwrap();
        store
            .create_chunk(NewChunk::new("b", ChunkType::Note, "c1", 1).with_tags(["t"]))
            .unwrap();
        store
            .create_chunk(NewChunk::new("c", ChunkType::Fact, "c1", 1))
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.by_type[&ChunkType::Note], 2);
        assert_eq!(stats.by_type[&ChunkType::Fact], 1);
        assert_eq!(stats.total_tags, 1);
    }
}
