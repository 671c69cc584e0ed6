//! Adjacency index over chunk links.
//!
//! One `add_link(from, to, type)` records exactly two entries: `to` under
//! `forward[from][type]` and `from` under `reverse[to]["<type>_reverse"]`.
//! It never records the opposite forward edge; symmetric link types are
//! symmetric only because the linker adds both directions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::{ChunkId, LinkType};

type EdgeMap = BTreeMap<String, Vec<ChunkId>>;

/// Serializable forward/reverse adjacency maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkIndex {
    #[serde(default)]
    forward: HashMap<ChunkId, EdgeMap>,
    #[serde(default)]
    reverse: HashMap<ChunkId, EdgeMap>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `from -> to`. Returns false if the edge already existed.
    pub fn add_link(&mut self, from: &ChunkId, to: &ChunkId, link_type: LinkType) -> bool {
        let forward = self
            .forward
            .entry(from.clone())
            .or_default()
            .entry(link_type.as_str().to_string())
            .or_default();
        let added_forward = push_unique(forward, to);

        let reverse = self
            .reverse
            .entry(to.clone())
            .or_default()
            .entry(link_type.reverse_key())
            .or_default();
        let added_reverse = push_unique(reverse, from);

        added_forward || added_reverse
    }

    /// Targets of edges leaving `id`. `None` unions every type.
    pub fn outgoing(&self, id: &ChunkId, link_type: Option<LinkType>) -> Vec<ChunkId> {
        match self.forward.get(id) {
            Some(edges) => collect_edges(edges, link_type, |t| t.as_str().to_string()),
            None => Vec::new(),
        }
    }

    /// Sources of edges entering `id`. `None` unions every type.
    pub fn incoming(&self, id: &ChunkId, link_type: Option<LinkType>) -> Vec<ChunkId> {
        match self.reverse.get(id) {
            Some(edges) => collect_edges(edges, link_type, |t| t.reverse_key()),
            None => Vec::new(),
        }
    }

    /// Forward edges of `id` grouped by type.
    pub fn links(&self, id: &ChunkId) -> BTreeMap<LinkType, Vec<ChunkId>> {
        let mut out = BTreeMap::new();
        if let Some(edges) = self.forward.get(id) {
            for (key, targets) in edges {
                if let Ok(link_type) = key.parse::<LinkType>() {
                    if !targets.is_empty() {
                        out.insert(link_type, targets.clone());
                    }
                }
            }
        }
        out
    }

    /// Forward neighbours of `id` reachable through an allowed edge type.
    fn neighbours(&self, id: &ChunkId, link_types: Option<&[LinkType]>) -> Vec<ChunkId> {
        match link_types {
            None => self.outgoing(id, None),
            Some(allowed) => {
                let mut out = Vec::new();
                for link_type in LinkType::ALL.iter().filter(|t| allowed.contains(t)) {
                    for target in self.outgoing(id, Some(*link_type)) {
                        push_unique(&mut out, &target);
                    }
                }
                out
            }
        }
    }

    /// Breadth-first walk from `start`, excluding `start`, at most `max_depth` hops.
    pub fn traverse(
        &self,
        start: &ChunkId,
        max_depth: usize,
        link_types: Option<&[LinkType]>,
    ) -> Vec<ChunkId> {
        let mut visited: HashSet<ChunkId> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([(start.clone(), 0usize)]);
        let mut result = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for target in self.neighbours(&current, link_types) {
                if visited.insert(target.clone()) {
                    result.push(target.clone());
                    queue.push_back((target, depth + 1));
                }
            }
        }
        result
    }

    /// Shortest forward path from `from` to `to`, both ends included.
    pub fn path(
        &self,
        from: &ChunkId,
        to: &ChunkId,
        link_types: Option<&[LinkType]>,
    ) -> Option<Vec<ChunkId>> {
        if from == to {
            return Some(vec![from.clone()]);
        }

        let mut visited: HashSet<ChunkId> = HashSet::from([from.clone()]);
        let mut queue = VecDeque::from([vec![from.clone()]]);

        while let Some(path) = queue.pop_front() {
            let current = path.last()?;
            for target in self.neighbours(current, link_types) {
                if &target == to {
                    let mut found = path.clone();
                    found.push(target);
                    return Some(found);
                }
                if visited.insert(target.clone()) {
                    let mut next = path.clone();
                    next.push(target);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Total number of forward edges.
    pub fn edge_count(&self) -> usize {
        self.forward
            .values()
            .flat_map(|edges| edges.values())
            .map(Vec::len)
            .sum()
    }

    /// Number of distinct chunks touching any edge.
    pub fn node_count(&self) -> usize {
        self.forward
            .keys()
            .chain(self.reverse.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    /// Update the last-modified timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Serialization)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::Serialization)
    }
}

fn push_unique(list: &mut Vec<ChunkId>, id: &ChunkId) -> bool {
    if list.contains(id) {
        return false;
    }
    list.push(id.clone());
    true
}

fn collect_edges(
    edges: &EdgeMap,
    link_type: Option<LinkType>,
    key_of: impl Fn(&LinkType) -> String,
) -> Vec<ChunkId> {
    match link_type {
        Some(t) => edges.get(&key_of(&t)).cloned().unwrap_or_default(),
        None => {
            let mut out = Vec::new();
            for t in LinkType::ALL.iter() {
                if let Some(ids) = edges.get(&key_of(t)) {
                    for id in ids {
                        push_unique(&mut out, id);
                    }
                }
            }
            out
        }
    }
}

/// Write-through link graph persisted as a single JSON file.
///
/// Shared between the linker and sandbox sessions through an `Arc`; every
/// method takes `&self`.
#[derive(Debug)]
pub struct LinkGraph {
    path: Option<PathBuf>,
    index: Mutex<LinkIndex>,
}

impl LinkGraph {
    /// Open the graph stored at `path`. A missing or malformed file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = if path.exists() {
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|json| LinkIndex::from_json(&json))
            {
                Ok(index) => {
                    info!(path = %path.display(), edges = index.edge_count(), "Loaded link graph");
                    index
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not load link graph, starting empty");
                    LinkIndex::new()
                }
            }
        } else {
            LinkIndex::new()
        };

        Ok(Self {
            path: Some(path),
            index: Mutex::new(index),
        })
    }

    /// A graph that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: Mutex::new(LinkIndex::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_index<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LinkIndex) -> T,
    {
        let mut index = self
            .index
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock link graph: {}", e)))?;
        Ok(f(&mut index))
    }

    /// Add one directed edge and persist. Idempotent.
    pub fn add_link(&self, from: &ChunkId, to: &ChunkId, link_type: LinkType) -> Result<bool> {
        let mut index = self
            .index
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock link graph: {}", e)))?;

        let added = index.add_link(from, to, link_type);
        if added {
            index.touch();
            self.save(&index)?;
            debug!(from = %from, to = %to, link_type = %link_type, "Added link");
        }
        Ok(added)
    }

    fn save(&self, index: &LinkIndex) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, index.to_json()?)
            .map_err(|e| Error::storage(format!("Failed to save link graph: {}", e)))
    }

    pub fn get_outgoing(&self, id: &ChunkId, link_type: Option<LinkType>) -> Result<Vec<ChunkId>> {
        self.with_index(|index| index.outgoing(id, link_type))
    }

    pub fn get_incoming(&self, id: &ChunkId, link_type: Option<LinkType>) -> Result<Vec<ChunkId>> {
        self.with_index(|index| index.incoming(id, link_type))
    }

    pub fn get_links(&self, id: &ChunkId) -> Result<BTreeMap<LinkType, Vec<ChunkId>>> {
        self.with_index(|index| index.links(id))
    }

    pub fn traverse(
        &self,
        start: &ChunkId,
        max_depth: usize,
        link_types: Option<&[LinkType]>,
    ) -> Result<Vec<ChunkId>> {
        self.with_index(|index| index.traverse(start, max_depth, link_types))
    }

    pub fn get_path(
        &self,
        from: &ChunkId,
        to: &ChunkId,
        link_types: Option<&[LinkType]>,
    ) -> Result<Option<Vec<ChunkId>>> {
        self.with_index(|index| index.path(from, to, link_types))
    }

    pub fn edge_count(&self) -> Result<usize> {
        self.with_index(|index| index.edge_count())
    }

    pub fn node_count(&self) -> Result<usize> {
        self.with_index(|index| index.node_count())
    }

    /// Copy of the current index.
    pub fn snapshot(&self) -> Result<LinkIndex> {
        self.with_index(|index| index.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ChunkId {
        ChunkId::from(s)
    }

    #[test]
    fn test_add_link_is_one_directional() {
        let mut index = LinkIndex::new();
        assert!(index.add_link(&id("a"), &id("b"), LinkType::ContextOf));

        assert_eq!(index.outgoing(&id("a"), Some(LinkType::ContextOf)), vec![id("b")]);
        assert_eq!(index.incoming(&id("b"), Some(LinkType::ContextOf)), vec![id("a")]);
        assert!(index.outgoing(&id("b"), None).is_empty());
        assert!(index.incoming(&id("a"), None).is_empty());
    }

    #[test]
    fn test_add_link_idempotent() {
        let mut index = LinkIndex::new();
        assert!(index.add_link(&id("a"), &id("b"), LinkType::Follows));
        assert!(!index.add_link(&id("a"), &id("b"), LinkType::Follows));
        assert_eq!(index.edge_count(), 1);
        assert_eq!(index.incoming(&id("b"), None), vec![id("a")]);
    }

    #[test]
    fn test_union_deduplicates() {
        let mut index = LinkIndex::new();
        index.add_link(&id("a"), &id("b"), LinkType::ContextOf);
        index.add_link(&id("a"), &id("b"), LinkType::Follows);
        index.add_link(&id("a"), &id("c"), LinkType::RelatedTo);
        assert_eq!(index.outgoing(&id("a"), None), vec![id("b"), id("c")]);
        assert_eq!(index.edge_count(), 3);
        assert_eq!(index.node_count(), 3);
    }

    #[test]
    fn test_traverse_depth_and_filter() {
        let mut index = LinkIndex::new();
        index.add_link(&id("a"), &id("b"), LinkType::Follows);
        index.add_link(&id("b"), &id("c"), LinkType::Follows);
        index.add_link(&id("c"), &id("d"), LinkType::RelatedTo);
        index.add_link(&id("d"), &id("a"), LinkType::Follows);

        assert!(index.traverse(&id("a"), 0, None).is_empty());
        assert_eq!(index.traverse(&id("a"), 1, None), vec![id("b")]);
        assert_eq!(index.traverse(&id("a"), 10, None), vec![id("b"), id("c"), id("d")]);
        assert_eq!(
            index.traverse(&id("a"), 10, Some(&[LinkType::Follows])),
            vec![id("b"), id("c")]
        );
    }

    #[test]
    fn test_path() {
        let mut index = LinkIndex::new();
        index.add_link(&id("a"), &id("b"), LinkType::Follows);
        index.add_link(&id("b"), &id("c"), LinkType::ContextOf);
        index.add_link(&id("a"), &id("x"), LinkType::ContextOf);

        assert_eq!(index.path(&id("a"), &id("a"), None), Some(vec![id("a")]));
        assert_eq!(
            index.path(&id("a"), &id("c"), None),
            Some(vec![id("a"), id("b"), id("c")])
        );
        assert_eq!(index.path(&id("a"), &id("c"), Some(&[LinkType::Follows])), None);
        assert_eq!(index.path(&id("c"), &id("a"), None), None);
    }

    #[test]
    fn test_links_grouped_by_type() {
        let mut index = LinkIndex::new();
        index.add_link(&id("a"), &id("b"), LinkType::Supports);
        index.add_link(&id("a"), &id("c"), LinkType::Contradicts);
        let links = index.links(&id("a"));
        assert_eq!(links[&LinkType::Supports], vec![id("b")]);
        assert_eq!(links[&LinkType::Contradicts], vec![id("c")]);
        assert!(index.links(&id("zzz")).is_empty());
    }

    #[test]
    fn test_graph_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("link_graph_index.json");

        let graph = LinkGraph::open(&path).unwrap();
        assert!(graph.add_link(&id("a"), &id("b"), LinkType::ContextOf).unwrap());
        assert!(path.exists());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["forward"]["a"]["context_of"][0], "b");
        assert_eq!(raw["reverse"]["b"]["context_of_reverse"][0], "a");
        assert!(raw["last_updated"].is_string());

        let reopened = LinkGraph::open(&path).unwrap();
        assert_eq!(
            reopened.get_outgoing(&id("a"), None).unwrap(),
            vec![id("b")]
        );
    }

    #[test]
    fn test_graph_get_path_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link_graph_index.json");

        let graph = LinkGraph::open(&path).unwrap();
        graph.add_link(&id("a"), &id("b"), LinkType::Follows).unwrap();
        graph.add_link(&id("b"), &id("c"), LinkType::Supports).unwrap();
        graph.add_link(&id("a"), &id("c"), LinkType::Contradicts).unwrap();

        assert_eq!(
            graph.get_path(&id("a"), &id("c"), None).unwrap(),
            Some(vec![id("a"), id("c")])
        );

        let reopened = LinkGraph::open(&path).unwrap();
        let followed: &[LinkType] = &[LinkType::Follows, LinkType::Supports];
        assert_eq!(
            reopened.get_path(&id("a"), &id("c"), Some(followed)).unwrap(),
            Some(vec![id("a"), id("b"), id("c")])
        );
        assert_eq!(reopened.get_path(&id("c"), &id("a"), None).unwrap(), None);
        assert_eq!(
            LinkGraph::in_memory().get_path(&id("a"), &id("b"), None).unwrap(),
            None
        );
    }

    #[test]
    fn test_graph_tolerates_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link_graph_index.json");
        fs::write(&path, "not json").unwrap();

        let graph = LinkGraph::open(&path).unwrap();
        assert_eq!(graph.edge_count().unwrap(), 0);
    }
}
