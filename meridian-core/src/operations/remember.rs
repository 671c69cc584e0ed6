//! Storing new memories.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::RememberConfig;
use crate::error::{Error, Result};
use crate::graph::AutoLinker;
use crate::memory::{ChunkId, ChunkType, NewChunk};

/// What to remember.
#[derive(Debug, Clone)]
pub struct RememberRequest {
    pub content: String,
    pub conversation_id: String,
    pub tags: Vec<String>,
    /// Falls back to [`RememberConfig::default_confidence`]
    pub confidence: Option<f64>,
    pub chunk_type: ChunkType,
}

impl RememberRequest {
    pub fn new(content: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            conversation_id: conversation_id.into(),
            tags: Vec::new(),
            confidence: None,
            chunk_type: ChunkType::Note,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_type(mut self, chunk_type: ChunkType) -> Self {
        self.chunk_type = chunk_type;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberResult {
    pub success: bool,
    pub chunks_created: usize,
    /// Chunks stored before any failure, in content order
    pub chunk_ids: Vec<ChunkId>,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RememberResult {
    fn rejected(err: &Error) -> Self {
        Self {
            success: false,
            chunks_created: 0,
            chunk_ids: Vec::new(),
            total_tokens: 0,
            error: Some(err.to_string()),
        }
    }
}

/// Rough token count: one token per four characters, at least one.
pub fn estimate_tokens(text: &str) -> u32 {
    let tokens = text.chars().count() / 4;
    u32::try_from(tokens).unwrap_or(u32::MAX).max(1)
}

/// Split `content` into pieces of at most `max_tokens`, breaking on blank
/// lines first and on whitespace inside oversized paragraphs.
pub fn split_content(content: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = u32::try_from(max_tokens.max(1)).unwrap_or(u32::MAX);
    if estimate_tokens(content) <= max_tokens {
        return vec![content.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for paragraph in paragraphs(content) {
        let candidate = if current.is_empty() {
            paragraph.to_string()
        } else {
            format!("{}\n\n{}", current, paragraph)
        };
        if estimate_tokens(&candidate) <= max_tokens {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if estimate_tokens(paragraph) <= max_tokens {
            current = paragraph.to_string();
        } else {
            let mut words = split_words(paragraph, max_tokens);
            if let Some(last) = words.pop() {
                pieces.extend(words);
                current = last;
            }
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn paragraphs(content: &str) -> impl Iterator<Item = &str> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

fn split_words(paragraph: &str, max_tokens: u32) -> Vec<String> {
    let max_chars = usize::try_from(max_tokens)
        .unwrap_or(usize::MAX)
        .saturating_mul(4);
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph
        .split_whitespace()
        .flat_map(|w| split_long_word(w, max_chars))
    {
        if !current.is_empty() && estimate_tokens(&current) + estimate_tokens(&word) >= max_tokens {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Cut a word with no whitespace into runs of at most `max_chars` characters.
fn split_long_word(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|run| run.iter().collect())
        .collect()
}

fn validate(request: &RememberRequest, config: &RememberConfig) -> Result<f64> {
    if request.content.trim().is_empty() {
        return Err(Error::invalid_input("Cannot remember empty content"));
    }
    if request.conversation_id.trim().is_empty() {
        return Err(Error::invalid_input("conversation_id is required"));
    }
    let confidence = request.confidence.unwrap_or(config.default_confidence);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::invalid_input(format!(
            "confidence must be in [0, 1], got {}",
            confidence
        )));
    }
    Ok(confidence)
}

/// Store each piece through `create`, stopping at the first failure. Pieces
/// stored before the failure stay stored and are reported.
fn store_pieces<F>(pieces: Vec<String>, mut create: F) -> RememberResult
where
    F: FnMut(String, u32) -> Result<ChunkId>,
{
    let mut chunk_ids = Vec::new();
    let mut total_tokens = 0u32;
    let mut error = None;
    for piece in pieces {
        let tokens = estimate_tokens(&piece);
        match create(piece, tokens) {
            Ok(id) => {
                total_tokens = total_tokens.saturating_add(tokens);
                chunk_ids.push(id);
            }
            Err(err) => {
                warn!(stored = chunk_ids.len(), error = %err, "Remember stopped partway");
                error = Some(err.to_string());
                break;
            }
        }
    }
    RememberResult {
        success: error.is_none(),
        chunks_created: chunk_ids.len(),
        chunk_ids,
        total_tokens,
        error,
    }
}

/// Store `request` as one or more auto-linked chunks.
///
/// Never fails outright: rejected input and storage errors come back as a
/// result with `success == false` and the ids of any chunks already stored.
#[instrument(skip_all, fields(conversation = %request.conversation_id))]
pub fn remember(
    linker: &AutoLinker,
    request: RememberRequest,
    config: &RememberConfig,
) -> RememberResult {
    let confidence = match validate(&request, config) {
        Ok(confidence) => confidence,
        Err(err) => {
            warn!(error = %err, "Remember rejected");
            return RememberResult::rejected(&err);
        }
    };

    let pieces = split_content(request.content.trim(), config.max_chunk_tokens);
    let result = store_pieces(pieces, |piece, tokens| {
        let chunk = linker.create_chunk_with_links(
            NewChunk::new(piece, request.chunk_type, request.conversation_id.as_str(), tokens)
                .with_tags(&request.tags)
                .with_confidence(confidence),
        )?;
        Ok(chunk.id)
    });

    if result.success {
        info!(
            chunks = result.chunks_created,
            tokens = result.total_tokens,
            "Remembered content"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LinkGraph;
    use crate::memory::{ChunkStore, LinkType};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn linker() -> (TempDir, AutoLinker) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).unwrap());
        let graph = Arc::new(LinkGraph::in_memory());
        (dir, AutoLinker::new(store, graph))
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(40)), 10);
    }

    #[test]
    fn test_short_content_is_one_piece() {
        assert_eq!(split_content("one\n\ntwo", 100), vec!["one\n\ntwo"]);
    }

    #[test]
    fn test_split_on_paragraphs() {
        // six 4-token paragraphs pack two to a 10-token piece
        let para = "abcd abcd abcd abcd";
        let content = vec![para; 6].join("\n\n");
        let pieces = split_content(&content, 10);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| estimate_tokens(p) <= 10));
        assert!(pieces.iter().all(|p| p.contains("\n\n")));
    }

    #[test]
    fn test_oversized_paragraph_split_on_words() {
        let content = "alpha ".repeat(50);
        let pieces = split_content(&content, 10);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| estimate_tokens(p) <= 10));
        let words: usize = pieces.iter().map(|p| p.split_whitespace().count()).sum();
        assert_eq!(words, 50);
    }

    #[test]
    fn test_long_word_is_cut_to_fit() {
        let word = "x".repeat(200);
        let pieces = split_content(&format!("short {}", word), 10);
        assert!(pieces.iter().all(|p| estimate_tokens(p) <= 10), "{:?}", pieces);
        let joined: String = pieces.iter().flat_map(|p| p.split_whitespace()).collect();
        assert_eq!(joined, format!("short{}", word));
    }

    #[test]
    fn test_remember_creates_linked_chunks() {
        let (_dir, linker) = linker();
        let first = remember(
            &linker,
            RememberRequest::new("User prefers VS Code", "conv-1")
                .with_tags(["preference", "editor"])
                .with_type(ChunkType::Preference)
                .with_confidence(0.9),
            &RememberConfig::default(),
        );
        assert!(first.success);
        assert!(first.error.is_none());
        assert_eq!(first.chunks_created, 1);
        assert_eq!(first.total_tokens, 5);

        let second = remember(
            &linker,
            RememberRequest::new("User likes dark mode", "conv-1"),
            &RememberConfig::default(),
        );

        let chunk = linker.store().get_chunk(&second.chunk_ids[0]).unwrap().unwrap();
        assert_eq!(chunk.confidence(), 0.7);
        assert_eq!(chunk.links.get(LinkType::ContextOf), first.chunk_ids.as_slice());
    }

    #[test]
    fn test_remember_rejects_bad_input() {
        let (_dir, linker) = linker();
        let config = RememberConfig::default();
        let requests = [
            RememberRequest::new("  ", "conv-1"),
            RememberRequest::new("text", ""),
            RememberRequest::new("text", "conv-1").with_confidence(1.5),
        ];
        for request in requests {
            let result = remember(&linker, request, &config);
            assert!(!result.success);
            assert_eq!(result.chunks_created, 0);
            assert!(result.error.is_some());
        }
        assert!(linker.store().all_chunks().unwrap().is_empty());

        let err = remember(&linker, RememberRequest::new("", "conv-1"), &config)
            .error
            .unwrap();
        assert!(err.contains("empty content"), "{}", err);
    }

    #[test]
    fn test_failure_midway_keeps_stored_pieces() {
        let pieces = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let mut calls = 0;
        let result = store_pieces(pieces, |piece, _| {
            calls += 1;
            if piece == "two" {
                return Err(Error::storage("disk full"));
            }
            Ok(ChunkId::from_string(format!("chunk-{}", piece)))
        });

        assert_eq!(calls, 2);
        assert!(!result.success);
        assert_eq!(result.chunks_created, 1);
        assert_eq!(result.chunk_ids, vec![ChunkId::from_string("chunk-one")]);
        assert_eq!(result.total_tokens, 1);
        assert!(result.error.unwrap().contains("disk full"));
    }
}
