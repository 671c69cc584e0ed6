//! Answering questions from memory.
//!
//! [`direct_search`] scores chunks by keyword overlap. [`RecallOperation`]
//! instead lets a model drive a sandboxed [`Session`]: each turn it is asked
//! for code, the code runs against the memory primitives, and the loop ends
//! when the code calls `FINAL`. Any failure on that path falls back to direct
//! search.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::search::{search, SearchOptions};
use crate::config::{RecallConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::graph::LinkGraph;
use crate::llm::QueryProvider;
use crate::memory::{ChunkId, ChunkStore};
use crate::sandbox::{to_str, Session, StoreHost};

const NO_QUERY: &str = "No query provided";
const NO_MATCHES: &str = "No relevant memories found";

/// Confidence given to a model answer whose sources cannot be resolved.
const UNSOURCED_CONFIDENCE: f64 = 0.5;

/// Scope and cut-offs for one recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallOptions {
    pub conversation_id: Option<String>,
    pub max_results: usize,
    pub min_confidence: f64,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self::from_config(&RecallConfig::default())
    }
}

impl RecallOptions {
    pub fn from_config(config: &RecallConfig) -> Self {
        Self {
            conversation_id: None,
            max_results: config.max_results,
            min_confidence: config.min_confidence,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResult {
    pub answer: String,
    pub confidence: f64,
    pub source_chunks: Vec<ChunkId>,
    pub iterations_used: u32,
    pub cost_usd: f64,
}

impl RecallResult {
    fn empty(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            confidence: 0.0,
            source_chunks: Vec::new(),
            iterations_used: 0,
            cost_usd: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_chunks.is_empty()
    }
}

/// Keyword recall: best `max_results` chunks, contents joined by blank lines,
/// confidence the mean of theirs.
pub fn direct_search(
    store: &ChunkStore,
    query: &str,
    synonyms: &BTreeMap<String, Vec<String>>,
    options: &RecallOptions,
) -> Result<RecallResult> {
    if query.trim().is_empty() {
        return Ok(RecallResult::empty(NO_QUERY));
    }
    let search_options = SearchOptions::default()
        .with_limit(options.max_results)
        .with_conversation(options.conversation_id.clone())
        .with_min_confidence(options.min_confidence);
    let hits = search(store, query, synonyms, &search_options)?;
    if hits.is_empty() {
        return Ok(RecallResult::empty(NO_MATCHES));
    }

    let confidence = hits.iter().map(|h| h.confidence).sum::<f64>() / hits.len() as f64;
    let answer = hits
        .iter()
        .map(|h| h.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(RecallResult {
        answer,
        confidence,
        source_chunks: hits.into_iter().map(|h| h.id).collect(),
        iterations_used: 1,
        cost_usd: 0.0,
    })
}

/// Instructions sent on the first turn.
pub fn recall_prompt(query: &str, conversation_id: Option<&str>) -> String {
    let scope = conversation_id
        .map(|c| format!(" in conversation {}", c))
        .unwrap_or_default();
    format!(
        r#"You are a memory retrieval system. Answer this query based on stored memories.

Query: "{query}"{scope}

Available functions:
- search_chunks(query, limit) - Search for relevant chunks
- read_chunk(chunk_id) - Read full chunk content
- list_chunks_by_tag(tag) - Find chunks by tag
- get_linked_chunks(chunk_id) - Follow memory links
- FINAL(answer) - Return final answer

Instructions:
1. Search for relevant memories using search_chunks()
2. Read promising chunks with read_chunk()
3. Follow links if needed with get_linked_chunks()
4. Synthesize a clear, concise answer
5. Use FINAL() to return your answer

Reply with a single ```python code block. Be thorough but efficient. Consider chunk confidence scores."#
    )
}

/// Model-driven recall over a store and its link graph.
pub struct RecallOperation {
    store: Arc<ChunkStore>,
    graph: Arc<LinkGraph>,
    provider: Arc<dyn QueryProvider>,
    session_config: SessionConfig,
    synonyms: BTreeMap<String, Vec<String>>,
    fence: Regex,
}

impl RecallOperation {
    pub fn new(
        store: Arc<ChunkStore>,
        graph: Arc<LinkGraph>,
        provider: Arc<dyn QueryProvider>,
    ) -> Result<Self> {
        let fence = Regex::new(r"(?s)```(?:python|py)?[ \t]*\n(.*?)```")
            .map_err(|e| Error::Internal(format!("Invalid code fence pattern: {}", e)))?;
        Ok(Self {
            store,
            graph,
            provider,
            session_config: SessionConfig::default(),
            synonyms: crate::config::default_synonyms(),
            fence,
        })
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn with_synonyms(mut self, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Recall through a session, falling back to [`direct_search`] on any
    /// failure or when the model never calls `FINAL`.
    #[instrument(skip(self, options), fields(provider = self.provider.name()))]
    pub fn recall(&self, query: &str, options: &RecallOptions) -> Result<RecallResult> {
        if query.trim().is_empty() {
            return Ok(RecallResult::empty(NO_QUERY));
        }
        match self.session_recall(query, options) {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                info!("Session ended without FINAL, using direct search");
                direct_search(&self.store, query, &self.synonyms, options)
            }
            Err(e) => {
                warn!(error = %e, "Session recall failed, using direct search");
                direct_search(&self.store, query, &self.synonyms, options)
            }
        }
    }

    /// Code blocks in a model reply, or the whole reply if it calls `FINAL`
    /// without fencing.
    pub fn extract_code(&self, reply: &str) -> Option<String> {
        let blocks: Vec<&str> = self
            .fence
            .captures_iter(reply)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect();
        if !blocks.is_empty() {
            return Some(blocks.join("\n"));
        }
        let trimmed = reply.trim();
        trimmed.contains("FINAL(").then(|| trimmed.to_string())
    }

    fn session_recall(&self, query: &str, options: &RecallOptions) -> Result<Option<RecallResult>> {
        let host = StoreHost::new(self.store.clone(), self.graph.clone())
            .with_synonyms(self.synonyms.clone())
            .with_conversation(options.conversation_id.clone())
            .with_min_confidence(options.min_confidence);
        let mut session = Session::new(self.session_config.clone())
            .with_host(Arc::new(host))
            .with_provider(self.provider.clone());

        let mut prompt = recall_prompt(query, options.conversation_id.as_deref());
        while !session.is_complete() {
            // the driving query counts against the same iteration and cost budgets
            session.set_variable("recall_prompt", Value::String(prompt.clone()))?;
            let reply = to_str(&session.execute("llm_query(recall_prompt)", None)?);
            let Some(code) = self.extract_code(&reply) else {
                debug!("Reply contained no code");
                break;
            };

            let printed_before = session.output().len();
            let feedback = match session.execute(&code, None) {
                Ok(_) => session.output()[printed_before..].join("\n"),
                Err(e) if e.is_budget() => return Err(e),
                Err(e) => format!("Error: {}", e),
            };
            if session.is_complete() {
                break;
            }
            prompt = format!(
                "{}\n\nYour code:\n```python\n{}\n```\nResult:\n{}\n\nContinue, and call FINAL() when you have the answer.",
                prompt,
                code.trim_end(),
                if feedback.is_empty() { "(no output)" } else { feedback.as_str() }
            );
        }

        let Some(answer) = session.retrieve() else {
            return Ok(None);
        };
        let sources: Vec<ChunkId> = if session.read_chunks().is_empty() {
            session.accessed_chunks().to_vec()
        } else {
            session.read_chunks().to_vec()
        };
        let sources: Vec<ChunkId> = sources.into_iter().take(options.max_results.max(1)).collect();
        let confidence = self.mean_confidence(&sources)?;
        Ok(Some(RecallResult {
            answer: to_str(answer),
            confidence,
            source_chunks: sources,
            iterations_used: session.iteration_count(),
            cost_usd: session.total_cost(),
        }))
    }

    fn mean_confidence(&self, ids: &[ChunkId]) -> Result<f64> {
        let mut values = Vec::new();
        for id in ids {
            if let Some(chunk) = self.store.get_chunk(id)? {
                values.push(chunk.confidence());
            }
        }
        if ids.is_empty() {
            return Ok(0.0);
        }
        if values.is_empty() {
            return Ok(UNSOURCED_CONFIDENCE);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_synonyms;
    use crate::graph::AutoLinker;
    use crate::llm::ScriptedProvider;
    use crate::memory::{ChunkType, NewChunk};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<ChunkStore>,
        graph: Arc<LinkGraph>,
        editor: ChunkId,
        theme: ChunkId,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).unwrap());
        let graph = Arc::new(LinkGraph::in_memory());
        let linker = AutoLinker::new(store.clone(), graph.clone());
        let editor = linker
            .create_chunk_with_links(
                NewChunk::new("User prefers VS Code", ChunkType::Preference, "conv-1", 5)
                    .with_tags(["preference", "editor"])
                    .with_confidence(0.9),
            )
            .unwrap();
        let theme = linker
            .create_chunk_with_links(
                NewChunk::new("User likes dark mode", ChunkType::Preference, "conv-1", 5)
                    .with_tags(["preference", "ui"])
                    .with_confidence(0.8),
            )
            .unwrap();
        Fixture {
            _dir: dir,
            store,
            graph,
            editor: editor.id,
            theme: theme.id,
        }
    }

    fn operation(f: &Fixture, provider: ScriptedProvider) -> RecallOperation {
        RecallOperation::new(f.store.clone(), f.graph.clone(), Arc::new(provider)).unwrap()
    }

    #[test]
    fn test_direct_search_end_to_end() {
        let f = fixture();
        let options = RecallOptions::default().with_max_results(1);
        let result = direct_search(&f.store, "editor", &default_synonyms(), &options).unwrap();
        assert_eq!(result.source_chunks, vec![f.editor.clone()]);
        assert_eq!(result.answer, "User prefers VS Code");
        assert!(result.confidence > 0.0);

        let missing =
            direct_search(&f.store, "nonexistent-topic", &default_synonyms(), &RecallOptions::default())
                .unwrap();
        assert_eq!(missing.confidence, 0.0);
        assert!(missing.source_chunks.is_empty());
        assert_eq!(missing.answer, "No relevant memories found");
    }

    #[test]
    fn test_direct_search_joins_answers() {
        let f = fixture();
        let result =
            direct_search(&f.store, "user", &default_synonyms(), &RecallOptions::default()).unwrap();
        assert_eq!(result.answer, "User prefers VS Code\n\nUser likes dark mode");
        assert!((result.confidence - 0.85).abs() < 1e-9);
        assert_eq!(result.source_chunks, vec![f.editor.clone(), f.theme.clone()]);
    }

    #[test]
    fn test_empty_query() {
        let f = fixture();
        let result = direct_search(&f.store, "  ", &default_synonyms(), &RecallOptions::default())
            .unwrap();
        assert_eq!(result.answer, "No query provided");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_session_recall_reads_and_finishes() {
        let f = fixture();
        let reply = "Let me look.\n```python\nhits = search_chunks('editor', limit=1)\nchunk = read_chunk(hits[0]['id'])\nFINAL(chunk['content'])\n```";
        let provider = ScriptedProvider::new([reply]).with_cost_per_call(0.002);
        let op = operation(&f, provider);

        let result = op.recall("which editor?", &RecallOptions::default()).unwrap();
        assert_eq!(result.answer, "User prefers VS Code");
        assert_eq!(result.source_chunks, vec![f.editor.clone()]);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert_eq!(result.iterations_used, 1);
        assert!((result.cost_usd - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_session_recall_retries_after_error() {
        let f = fixture();
        let provider = Arc::new(ScriptedProvider::new([
            "```python\nx = missing_name\n```",
            "```python\nFINAL('dark mode')\n```",
        ]));
        let op = RecallOperation::new(f.store.clone(), f.graph.clone(), provider.clone()).unwrap();

        let result = op.recall("theme", &RecallOptions::default()).unwrap();
        assert_eq!(result.answer, "dark mode");
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.confidence, 0.0);
        assert!(provider.prompts()[1].contains("NameError"));
    }

    #[test]
    fn test_falls_back_when_provider_fails() {
        let f = fixture();
        let op = operation(&f, ScriptedProvider::failing("offline"));
        let result = op
            .recall("editor", &RecallOptions::default().with_max_results(1))
            .unwrap();
        assert_eq!(result.source_chunks, vec![f.editor.clone()]);
        assert_eq!(result.cost_usd, 0.0);
    }

    #[test]
    fn test_falls_back_without_final() {
        let f = fixture();
        let op = operation(&f, ScriptedProvider::new(["I am not sure."]));
        let result = op.recall("nonexistent-topic", &RecallOptions::default()).unwrap();
        assert_eq!(result.answer, "No relevant memories found");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_budget_exhaustion_falls_back() {
        let f = fixture();
        let replies = vec!["```python\nprint('thinking')\n```"; 5];
        let op = operation(&f, ScriptedProvider::new(replies))
            .with_session_config(SessionConfig::default().with_max_iterations(3));
        let result = op
            .recall("editor", &RecallOptions::default().with_max_results(1))
            .unwrap();
        assert_eq!(result.source_chunks, vec![f.editor.clone()]);
    }

    #[test]
    fn test_extract_code() {
        let f = fixture();
        let op = operation(&f, ScriptedProvider::new(Vec::<String>::new()));
        assert_eq!(
            op.extract_code("```python\na = 1\n```\ntext\n```\nb = 2\n```").as_deref(),
            Some("a = 1\n\nb = 2\n")
        );
        assert_eq!(op.extract_code("FINAL('x')").as_deref(), Some("FINAL('x')"));
        assert_eq!(op.extract_code("no code here"), None);
    }

    #[test]
    fn test_prompt_mentions_primitives() {
        let prompt = recall_prompt("editor", Some("conv-1"));
        for name in ["search_chunks", "read_chunk", "list_chunks_by_tag", "get_linked_chunks", "FINAL"] {
            assert!(prompt.contains(name));
        }
        assert!(prompt.contains("Query: \"editor\" in conversation conv-1"));
    }
}
