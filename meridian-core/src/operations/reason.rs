//! Analysis over a set of evidence chunks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::{Chunk, ChunkId, ChunkStore, ChunkType};

/// Chunks below this confidence count as a gap.
pub const LOW_CONFIDENCE: f64 = 0.6;

const MAX_LISTED: usize = 5;
const INSIGHT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Combine the evidence into one summary
    #[default]
    Synthesis,
    /// Side-by-side listing; needs two or more chunks
    Comparison,
    /// Shared tags, types, and time spread
    Pattern,
    /// Low-confidence and unlinked chunks
    Gap,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synthesis => "synthesis",
            Self::Comparison => "comparison",
            Self::Pattern => "pattern",
            Self::Gap => "gap",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synthesis" => Ok(Self::Synthesis),
            "comparison" => Ok(Self::Comparison),
            "pattern" => Ok(Self::Pattern),
            "gap" => Ok(Self::Gap),
            other => Err(Error::invalid_input(format!(
                "Unknown analysis type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonResult {
    pub synthesis: String,
    pub insights: Vec<String>,
    /// Named id lists backing the result, such as `sources` or `unlinked`
    pub evidence: BTreeMap<String, Vec<String>>,
    pub confidence: f64,
    pub source_chunks: Vec<ChunkId>,
}

impl ReasonResult {
    fn failure(message: &str) -> Self {
        Self {
            synthesis: message.to_string(),
            insights: Vec::new(),
            evidence: BTreeMap::new(),
            confidence: 0.0,
            source_chunks: Vec::new(),
        }
    }

    fn over(chunks: &[Chunk], synthesis: String, insights: Vec<String>, confidence: f64) -> Self {
        let source_chunks: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut evidence = BTreeMap::new();
        evidence.insert("sources".to_string(), id_strings(chunks.iter()));
        Self {
            synthesis,
            insights,
            evidence,
            confidence,
            source_chunks,
        }
    }
}

fn id_strings<'a>(chunks: impl Iterator<Item = &'a Chunk>) -> Vec<String> {
    chunks.map(|c| c.id.as_str().to_string()).collect()
}

/// Chunks under analysis with their distinct tags and types, first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub chunks: Vec<Chunk>,
    pub tags: Vec<String>,
    pub types: Vec<ChunkType>,
}

impl Evidence {
    /// Load `ids`, skipping ones that do not exist.
    pub fn gather(store: &ChunkStore, ids: &[ChunkId]) -> Result<Self> {
        let mut evidence = Self::default();
        for id in ids {
            if evidence.chunks.iter().any(|c| &c.id == id) {
                continue;
            }
            if let Some(chunk) = store.get_chunk(id)? {
                evidence.push(chunk);
            }
        }
        Ok(evidence)
    }

    pub fn push(&mut self, chunk: Chunk) {
        for tag in &chunk.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
        if !self.types.contains(&chunk.chunk_type) {
            self.types.push(chunk.chunk_type);
        }
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Run `analysis` over `evidence`. Never fails; empty input gives a
/// zero-confidence explanation.
pub fn reason(query: &str, evidence: &Evidence, analysis: AnalysisType) -> ReasonResult {
    if query.trim().is_empty() {
        return ReasonResult::failure("No query provided");
    }
    if evidence.is_empty() {
        return ReasonResult::failure("No relevant evidence found for analysis");
    }
    match analysis {
        AnalysisType::Synthesis => synthesize(evidence),
        AnalysisType::Comparison => compare(evidence),
        AnalysisType::Pattern => find_patterns(evidence),
        AnalysisType::Gap => identify_gaps(evidence),
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= INSIGHT_PREVIEW_CHARS {
        content.to_string()
    } else {
        let head: String = content.chars().take(INSIGHT_PREVIEW_CHARS).collect();
        format!("{}...", head)
    }
}

/// Preference and sentiment cues, deduplicated, at most five.
pub fn extract_insights(contents: &[&str]) -> Vec<String> {
    let mut insights: Vec<String> = Vec::new();
    for content in contents {
        let lower = content.to_lowercase();
        let mut found = Vec::new();
        if lower.contains("prefer") {
            found.push(format!("Preference identified: {}", preview(content)));
        }
        if lower.contains("like") {
            found.push(format!("Positive sentiment: {}", preview(content)));
        }
        for insight in found {
            if !insights.contains(&insight) {
                insights.push(insight);
            }
        }
    }
    insights.truncate(MAX_LISTED);
    insights
}

fn synthesize(evidence: &Evidence) -> ReasonResult {
    let contents: Vec<&str> = evidence.chunks.iter().map(|c| c.content.as_str()).collect();
    let synthesis = match contents.as_slice() {
        [single] => single.to_string(),
        many => {
            let mut lines = vec![format!("Based on {} sources:", many.len())];
            lines.extend(
                many.iter()
                    .take(MAX_LISTED)
                    .enumerate()
                    .map(|(i, c)| format!("{}. {}", i + 1, c)),
            );
            lines.join("\n")
        }
    };
    let confidence = evidence.chunks.iter().map(Chunk::confidence).sum::<f64>()
        / evidence.chunks.len() as f64;
    ReasonResult::over(
        &evidence.chunks,
        synthesis,
        extract_insights(&contents),
        confidence,
    )
}

fn compare(evidence: &Evidence) -> ReasonResult {
    let chunks = &evidence.chunks;
    if chunks.len() < 2 {
        return ReasonResult::failure("Need at least 2 items to compare");
    }
    let mut lines = vec!["Comparison:".to_string()];
    lines.extend(
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("Option {}: {}", i + 1, c.content)),
    );
    ReasonResult::over(
        chunks,
        lines.join("\n"),
        vec![format!("Comparing {} options", chunks.len())],
        0.7,
    )
}

fn find_patterns(evidence: &Evidence) -> ReasonResult {
    let chunks = &evidence.chunks;
    let mut insights = Vec::new();
    if !evidence.tags.is_empty() {
        let themes: Vec<&str> = evidence.tags.iter().take(MAX_LISTED).map(String::as_str).collect();
        insights.push(format!("Common themes: {}", themes.join(", ")));
    }
    if !evidence.types.is_empty() {
        let types: Vec<&str> = evidence.types.iter().map(ChunkType::as_str).collect();
        insights.push(format!("Content types: {}", types.join(", ")));
    }
    let days: BTreeSet<_> = chunks
        .iter()
        .map(|c| c.metadata.created.date_naive())
        .collect();
    insights.push(format!("Evidence spans {} time periods", days.len()));

    let mut result = ReasonResult::over(
        chunks,
        format!(
            "Found {} patterns across {} memories",
            insights.len(),
            chunks.len()
        ),
        insights,
        0.75,
    );
    result
        .evidence
        .insert("tags".to_string(), evidence.tags.clone());
    result.evidence.insert(
        "types".to_string(),
        evidence.types.iter().map(|t| t.as_str().to_string()).collect(),
    );
    result
}

fn identify_gaps(evidence: &Evidence) -> ReasonResult {
    let chunks = &evidence.chunks;
    let low: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| c.confidence() < LOW_CONFIDENCE)
        .collect();
    let unlinked: Vec<&Chunk> = chunks.iter().filter(|c| c.links.is_empty()).collect();

    let mut gaps = Vec::new();
    if !low.is_empty() {
        gaps.push(format!("{} items have low confidence", low.len()));
    }
    if !unlinked.is_empty() {
        gaps.push(format!("{} items have no connections", unlinked.len()));
    }
    if gaps.is_empty() {
        gaps.push("No significant gaps identified".to_string());
    }

    let mut result = ReasonResult::over(
        chunks,
        format!("Knowledge gap analysis: {}", gaps.join("; ")),
        gaps,
        0.6,
    );
    result
        .evidence
        .insert("low_confidence".to_string(), id_strings(low.into_iter()));
    result
        .evidence
        .insert("unlinked".to_string(), id_strings(unlinked.into_iter()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AutoLinker, LinkGraph};
    use crate::memory::NewChunk;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn evidence(specs: &[(&str, &[&str], f64)]) -> (TempDir, Evidence) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).unwrap());
        let linker = AutoLinker::new(store.clone(), Arc::new(LinkGraph::in_memory()));
        let mut ids = Vec::new();
        for (i, (content, tags, confidence)) in specs.iter().enumerate() {
            let chunk = linker
                .create_chunk_with_links(
                    NewChunk::new(*content, ChunkType::Preference, format!("conv-{}", i), 4)
                        .with_tags(tags.iter().copied())
                        .with_confidence(*confidence),
                )
                .unwrap();
            ids.push(chunk.id);
        }
        let evidence = Evidence::gather(&store, &ids).unwrap();
        (dir, evidence)
    }

    #[test]
    fn test_empty_inputs_never_fail() {
        let empty = Evidence::default();
        let result = reason("anything", &empty, AnalysisType::Gap);
        assert_eq!(result.synthesis, "No relevant evidence found for analysis");
        assert_eq!(result.confidence, 0.0);

        let (_dir, ev) = evidence(&[("a", &[], 0.9)]);
        assert_eq!(reason("  ", &ev, AnalysisType::Synthesis).synthesis, "No query provided");
    }

    #[test]
    fn test_synthesis() {
        let (_dir, ev) = evidence(&[
            ("User prefers VS Code", &["editor"], 0.9),
            ("User likes dark mode", &["ui"], 0.7),
        ]);
        let result = reason("preferences", &ev, AnalysisType::Synthesis);
        assert_eq!(
            result.synthesis,
            "Based on 2 sources:\n1. User prefers VS Code\n2. User likes dark mode"
        );
        assert_eq!(
            result.insights,
            vec![
                "Preference identified: User prefers VS Code".to_string(),
                "Positive sentiment: User likes dark mode".to_string(),
            ]
        );
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.evidence["sources"].len(), 2);
    }

    #[test]
    fn test_single_source_synthesis_is_verbatim() {
        let (_dir, ev) = evidence(&[("Only fact", &[], 0.5)]);
        let result = reason("q", &ev, AnalysisType::Synthesis);
        assert_eq!(result.synthesis, "Only fact");
        assert!(result.insights.is_empty());
    }

    #[test]
    fn test_comparison_needs_two() {
        let (_dir, one) = evidence(&[("A", &[], 0.9)]);
        let result = reason("q", &one, AnalysisType::Comparison);
        assert_eq!(result.synthesis, "Need at least 2 items to compare");
        assert_eq!(result.confidence, 0.0);

        let (_dir2, two) = evidence(&[("A", &[], 0.9), ("B", &[], 0.9)]);
        let result = reason("q", &two, AnalysisType::Comparison);
        assert_eq!(result.synthesis, "Comparison:\nOption 1: A\nOption 2: B");
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.source_chunks.len(), 2);
    }

    #[test]
    fn test_patterns() {
        let (_dir, ev) = evidence(&[
            ("A", &["editor", "preference"], 0.9),
            ("B", &["preference", "ui"], 0.9),
        ]);
        let result = reason("q", &ev, AnalysisType::Pattern);
        assert_eq!(result.insights[0], "Common themes: editor, preference, ui");
        assert_eq!(result.insights[1], "Content types: preference");
        assert_eq!(result.insights[2], "Evidence spans 1 time periods");
        assert_eq!(result.synthesis, "Found 3 patterns across 2 memories");
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn test_gaps() {
        let (_dir, ev) = evidence(&[("A", &["x"], 0.4), ("B", &["y"], 0.9)]);
        let result = reason("q", &ev, AnalysisType::Gap);
        assert!(result.insights.contains(&"1 items have low confidence".to_string()));
        assert_eq!(result.evidence["low_confidence"].len(), 1);
        assert_eq!(result.confidence, 0.6);
        assert!(result.synthesis.starts_with("Knowledge gap analysis: "));
    }

    #[test]
    fn test_analysis_type_parsing() {
        assert_eq!("gap".parse::<AnalysisType>().unwrap(), AnalysisType::Gap);
        assert!("other".parse::<AnalysisType>().is_err());
        assert_eq!(AnalysisType::default(), AnalysisType::Synthesis);
    }
}
