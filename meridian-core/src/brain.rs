//! The memory facade: one handle over storage, linking, caching, and retrieval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cache::{CacheKey, CacheManager, CacheManagerStats};
use crate::config::MeridianConfig;
use crate::error::Result;
use crate::graph::{AutoLinker, Contradiction, LinkGraph};
use crate::llm::QueryProvider;
use crate::memory::{ChunkId, ChunkStore, LinkType, StoreStats};
use crate::operations::{
    direct_search, reason, remember, AnalysisType, Evidence, ReasonResult, RecallOperation,
    RecallOptions, RecallResult, RememberRequest, RememberResult,
};
use crate::sandbox::{Session, StoreHost};

/// File name of the persisted link graph under `<data_dir>/index`.
pub const GRAPH_FILE: &str = "link_graph_index.json";

/// Recall pulls this many chunks when `reason` is given no explicit evidence.
const REASON_RECALL_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainStats {
    pub store: StoreStats,
    pub cache: CacheManagerStats,
    pub generation: u64,
}

/// Persistent memory with remember, recall, and reason.
pub struct Brain {
    config: MeridianConfig,
    store: Arc<ChunkStore>,
    graph: Arc<LinkGraph>,
    linker: AutoLinker,
    cache: CacheManager,
    provider: Option<Arc<dyn QueryProvider>>,
    // Bumped on every write; part of each recall cache key.
    generation: AtomicU64,
}

impl Brain {
    /// Open (or create) the store, graph, and cache under `config.data_dir`.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub fn open(config: MeridianConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ChunkStore::open(&config.data_dir)?);
        let graph = Arc::new(LinkGraph::open(
            config.data_dir.join("index").join(GRAPH_FILE),
        )?);
        let linker = AutoLinker::new(Arc::clone(&store), Arc::clone(&graph))
            .with_temporal_window_minutes(config.linking.temporal_window_minutes);
        let cache = CacheManager::from_config(&config)?;

        info!(chunks = store.len()?, "Opened memory");
        Ok(Self {
            config,
            store,
            graph,
            linker,
            cache,
            provider: None,
            generation: AtomicU64::new(0),
        })
    }

    /// Route recall through model-driven sessions.
    pub fn with_provider(mut self, provider: Arc<dyn QueryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &MeridianConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<LinkGraph> {
        &self.graph
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Recall options seeded from configuration.
    pub fn recall_options(&self) -> RecallOptions {
        RecallOptions::from_config(&self.config.recall)
    }

    /// Store new content. Failures are reported in the result; cached
    /// recalls are dropped whenever anything was stored.
    pub fn remember(&self, request: RememberRequest) -> RememberResult {
        let result = remember(&self.linker, request, &self.config.remember);
        if result.chunks_created > 0 {
            self.invalidate();
        }
        result
    }

    /// Answer `query` from memory.
    ///
    /// With a provider this runs a sandboxed session (which itself falls back
    /// to direct search); without one it is a cached direct search.
    pub fn recall(&self, query: &str, options: &RecallOptions) -> Result<RecallResult> {
        match &self.provider {
            Some(provider) => RecallOperation::new(
                Arc::clone(&self.store),
                Arc::clone(&self.graph),
                Arc::clone(provider),
            )?
            .with_session_config(self.config.session.clone())
            .with_synonyms(self.config.recall.synonyms.clone())
            .recall(query, options),
            None => self.cached_search(query, options),
        }
    }

    fn cached_search(&self, query: &str, options: &RecallOptions) -> Result<RecallResult> {
        let generation = self.generation.load(Ordering::SeqCst).to_string();
        let max_results = options.max_results.to_string();
        let min_confidence = options.min_confidence.to_string();
        let key = CacheKey::generate(
            "recall",
            &[
                &generation,
                query,
                options.conversation_id.as_deref().unwrap_or(""),
                &max_results,
                &min_confidence,
            ],
        );

        if let Some(hit) = self.cache.get_as::<RecallResult>(key.as_str()) {
            debug!(key = %key, "Recall cache hit");
            return Ok(hit);
        }
        let result = direct_search(&self.store, query, &self.config.recall.synonyms, options)?;
        self.cache.set_as(key.as_str(), &result, None, false);
        Ok(result)
    }

    /// Analyze the given chunks, or whatever recall finds for `query` when
    /// `context` is empty.
    #[instrument(skip(self, context), fields(analysis = %analysis, explicit = context.len()))]
    pub fn reason(
        &self,
        query: &str,
        context: &[ChunkId],
        analysis: AnalysisType,
    ) -> Result<ReasonResult> {
        let evidence = if context.is_empty() {
            let options = self.recall_options().with_max_results(REASON_RECALL_LIMIT);
            let found = self.recall(query, &options)?;
            Evidence::gather(&self.store, &found.source_chunks)?
        } else {
            Evidence::gather(&self.store, context)?
        };
        Ok(reason(query, &evidence, analysis))
    }

    pub fn add_manual_link(
        &self,
        from: &ChunkId,
        to: &ChunkId,
        link_type: LinkType,
        reason: Option<&str>,
    ) -> Result<bool> {
        let linked = self.linker.add_manual_link(from, to, link_type, reason)?;
        if linked {
            self.invalidate();
        }
        Ok(linked)
    }

    pub fn find_contradictions(&self, ids: &[ChunkId]) -> Result<Vec<Contradiction>> {
        self.linker.find_contradictions(ids)
    }

    /// A fresh session over this memory, for callers driving their own loop.
    pub fn session(&self) -> Session {
        let host = StoreHost::new(Arc::clone(&self.store), Arc::clone(&self.graph))
            .with_synonyms(self.config.recall.synonyms.clone());
        let session = Session::new(self.config.session.clone()).with_host(Arc::new(host));
        match &self.provider {
            Some(provider) => session.with_provider(Arc::clone(provider)),
            None => session,
        }
    }

    pub fn stats(&self) -> Result<BrainStats> {
        Ok(BrainStats {
            store: self.store.get_stats()?,
            cache: self.cache.stats(),
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;
    use crate::memory::ChunkType;
    use tempfile::TempDir;

    fn brain() -> (TempDir, Brain) {
        let dir = TempDir::new().unwrap();
        let brain = Brain::open(MeridianConfig::new(dir.path())).unwrap();
        (dir, brain)
    }

    fn seed(brain: &Brain) -> (ChunkId, ChunkId) {
        let editor = brain.remember(
            RememberRequest::new("User prefers VS Code", "conv-1")
                .with_tags(["preference", "editor"])
                .with_type(ChunkType::Preference),
        );
        let ui = brain.remember(
            RememberRequest::new("User likes dark mode", "conv-1")
                .with_tags(["preference", "ui"])
                .with_type(ChunkType::Preference),
        );
        (editor.chunk_ids[0].clone(), ui.chunk_ids[0].clone())
    }

    #[test]
    fn test_remember_then_recall() {
        let (_dir, brain) = brain();
        let (editor, _) = seed(&brain);

        let result = brain
            .recall("editor", &brain.recall_options().with_max_results(1))
            .unwrap();
        assert_eq!(result.source_chunks, vec![editor]);
        assert!(result.confidence > 0.0);
        assert!(result.answer.contains("VS Code"));

        let missing = brain
            .recall("nonexistent-topic", &brain.recall_options())
            .unwrap();
        assert_eq!(missing.confidence, 0.0);
        assert!(missing.source_chunks.is_empty());
    }

    #[test]
    fn test_recall_is_cached_until_next_write() {
        let (_dir, brain) = brain();
        seed(&brain);
        let options = brain.recall_options();

        let first = brain.recall("preference", &options).unwrap();
        let second = brain.recall("preference", &options).unwrap();
        assert_eq!(first, second);
        assert!(brain.stats().unwrap().cache.memory.hits >= 1);

        brain.remember(
            RememberRequest::new("User prefers tabs over spaces", "conv-2")
                .with_tags(["preference"]),
        );
        let third = brain.recall("preference", &options).unwrap();
        assert_eq!(third.source_chunks.len(), first.source_chunks.len() + 1);
    }

    #[test]
    fn test_failed_remember_keeps_cache() {
        let (_dir, brain) = brain();
        seed(&brain);
        let before = brain.stats().unwrap().generation;

        let result = brain.remember(RememberRequest::new("   ", "conv-1"));
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(brain.stats().unwrap().generation, before);

        let stored = brain.remember(RememberRequest::new("User uses zsh", "conv-1"));
        assert!(stored.success);
        assert_eq!(brain.stats().unwrap().generation, before + 1);
    }

    #[test]
    fn test_reason_without_context_uses_recall() {
        let (_dir, brain) = brain();
        seed(&brain);

        let result = brain
            .reason("preference", &[], AnalysisType::Synthesis)
            .unwrap();
        assert_eq!(result.source_chunks.len(), 2);
        assert!(result.synthesis.starts_with("Based on 2 sources"));
    }

    #[test]
    fn test_reason_with_explicit_context() {
        let (_dir, brain) = brain();
        let (editor, ui) = seed(&brain);

        let result = brain
            .reason("compare", &[editor, ui], AnalysisType::Comparison)
            .unwrap();
        assert!(result.synthesis.starts_with("Comparison:"));
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_manual_contradiction_link() {
        let (_dir, brain) = brain();
        let (editor, ui) = seed(&brain);

        assert!(brain
            .add_manual_link(&editor, &ui, LinkType::Contradicts, Some("test"))
            .unwrap());
        let found = brain.find_contradictions(&[editor.clone(), ui.clone()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, editor);
        assert_eq!(found[0].target, ui);
    }

    #[test]
    fn test_provider_recall_reads_chunks() {
        let (_dir, brain) = brain();
        let (editor, _) = seed(&brain);
        let code = format!(
            "```python\nc = read_chunk('{}')\nFINAL(c['content'])\n```",
            editor
        );
        let brain = brain.with_provider(Arc::new(ScriptedProvider::new([code])));

        let result = brain
            .recall("Which editor?", &brain.recall_options())
            .unwrap();
        assert_eq!(result.answer, "User prefers VS Code");
        assert_eq!(result.source_chunks, vec![editor]);
    }

    #[test]
    fn test_session_is_wired_to_store() {
        let (_dir, brain) = brain();
        seed(&brain);
        let mut session = brain.session();
        let value = session
            .execute("len(list_chunks_by_tag('preference'))", None)
            .unwrap();
        assert_eq!(value, serde_json::json!(2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let config = MeridianConfig::new(dir.path()).with_temporal_window_minutes(-1);
        assert!(Brain::open(config).is_err());
    }
}
