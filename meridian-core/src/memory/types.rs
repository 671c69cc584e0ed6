//! Chunk types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Unique chunk identifier, `chunk-<32 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    const PREFIX: &'static str = "chunk-";

    pub fn new() -> Self {
        Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is safe to use as a file stem.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ChunkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of memory a chunk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Note,
    Fact,
    Preference,
    Decision,
    Pattern,
    Conversation,
    Summary,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Conversation => "conversation",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "decision" => Ok(Self::Decision),
            "pattern" => Ok(Self::Pattern),
            "conversation" => Ok(Self::Conversation),
            "summary" => Ok(Self::Summary),
            other => Err(Error::invalid_input(format!("unknown chunk type '{}'", other))),
        }
    }
}

/// Kind of edge between two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Same conversation (bidirectional)
    ContextOf,
    /// Created shortly after the target (unidirectional)
    Follows,
    /// Shares a tag (bidirectional)
    RelatedTo,
    /// Manual: source supports target
    Supports,
    /// Manual: source contradicts target
    Contradicts,
}

impl LinkType {
    pub const ALL: [LinkType; 5] = [
        Self::ContextOf,
        Self::Follows,
        Self::RelatedTo,
        Self::Supports,
        Self::Contradicts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextOf => "context_of",
            Self::Follows => "follows",
            Self::RelatedTo => "related_to",
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
        }
    }

    /// Key under which the reverse map stores this edge type.
    pub fn reverse_key(&self) -> String {
        format!("{}_reverse", self.as_str())
    }

    /// Types the auto-linker mirrors with a second edge.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, Self::ContextOf | Self::RelatedTo)
    }

    /// Types accepted by manual linking.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Supports | Self::Contradicts)
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "context_of" => Ok(Self::ContextOf),
            "follows" => Ok(Self::Follows),
            "related_to" => Ok(Self::RelatedTo),
            "supports" => Ok(Self::Supports),
            "contradicts" => Ok(Self::Contradicts),
            other => Err(Error::invalid_input(format!("unknown link type '{}'", other))),
        }
    }
}

/// Chunk metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub created: DateTime<Utc>,
    pub conversation_id: String,
    pub confidence: f64,
}

/// Outgoing link lists, one per edge type.
///
/// Lists only grow; `push` ignores ids already present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLinks {
    #[serde(default)]
    pub context_of: Vec<ChunkId>,
    #[serde(default)]
    pub follows: Vec<ChunkId>,
    #[serde(default)]
    pub related_to: Vec<ChunkId>,
    #[serde(default)]
    pub supports: Vec<ChunkId>,
    #[serde(default)]
    pub contradicts: Vec<ChunkId>,
}

impl ChunkLinks {
    pub fn get(&self, link_type: LinkType) -> &[ChunkId] {
        match link_type {
            LinkType::ContextOf => &self.context_of,
            LinkType::Follows => &self.follows,
            LinkType::RelatedTo => &self.related_to,
            LinkType::Supports => &self.supports,
            LinkType::Contradicts => &self.contradicts,
        }
    }

    fn get_mut(&mut self, link_type: LinkType) -> &mut Vec<ChunkId> {
        match link_type {
            LinkType::ContextOf => &mut self.context_of,
            LinkType::Follows => &mut self.follows,
            LinkType::RelatedTo => &mut self.related_to,
            LinkType::Supports => &mut self.supports,
            LinkType::Contradicts => &mut self.contradicts,
        }
    }

    /// Append `id` to the list for `link_type`. Returns false if already present.
    pub fn push(&mut self, link_type: LinkType, id: ChunkId) -> bool {
        let list = self.get_mut(link_type);
        if list.contains(&id) {
            return false;
        }
        list.push(id);
        true
    }

    pub fn contains(&self, link_type: LinkType, id: &ChunkId) -> bool {
        self.get(link_type).contains(id)
    }

    pub fn is_empty(&self) -> bool {
        LinkType::ALL.iter().all(|t| self.get(*t).is_empty())
    }

    pub fn total(&self) -> usize {
        LinkType::ALL.iter().map(|t| self.get(*t).len()).sum()
    }
}

/// The atomic memory unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    pub token_count: u32,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub tags: Vec<String>,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub links: ChunkLinks,
}

impl Chunk {
    pub fn confidence(&self) -> f64 {
        self.metadata.confidence
    }

    pub fn conversation_id(&self) -> &str {
        &self.metadata.conversation_id
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Number of tags shared with `other`.
    pub fn shared_tag_count(&self, other: &Chunk) -> usize {
        self.tags.iter().filter(|t| other.has_tag(t)).count()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::Serialization)
    }

    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(Error::Serialization)
    }
}

/// Deduplicate tags keeping first-seen order; blank tags are dropped.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        let id = ChunkId::new();
        assert!(id.as_str().starts_with("chunk-"));
        assert!(id.is_path_safe());
        assert_ne!(id, ChunkId::new());
        assert!(!ChunkId::from("../etc/passwd").is_path_safe());
    }

    #[test]
    fn test_links_push_deduplicates() {
        let mut links = ChunkLinks::default();
        assert!(links.push(LinkType::RelatedTo, "chunk-a".into()));
        assert!(!links.push(LinkType::RelatedTo, "chunk-a".into()));
        assert!(links.push(LinkType::RelatedTo, "chunk-b".into()));
        assert_eq!(links.related_to.len(), 2);
        assert_eq!(links.total(), 2);
        assert!(!links.is_empty());
    }

    #[test]
    fn test_type_parsing() {
        assert_eq!("Fact".parse::<ChunkType>().unwrap(), ChunkType::Fact);
        assert!("bogus".parse::<ChunkType>().is_err());
        assert_eq!("follows".parse::<LinkType>().unwrap(), LinkType::Follows);
        assert_eq!(LinkType::ContextOf.reverse_key(), "context_of_reverse");
        assert!(LinkType::Supports.is_manual());
        assert!(!LinkType::Follows.is_bidirectional());
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(["b", "a", "b", " ", "a "]);
        assert_eq!(tags, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_chunk_json_shape() {
        let chunk = Chunk {
            id: "chunk-1".into(),
            content: "hello".into(),
            token_count: 2,
            chunk_type: ChunkType::Note,
            tags: vec!["t".into()],
            metadata: ChunkMetadata {
                created: Utc::now(),
                conversation_id: "conv".into(),
                confidence: 0.5,
            },
            links: ChunkLinks::default(),
        };
        let value: serde_json::Value = serde_json::from_str(&chunk.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "note");
        assert_eq!(value["metadata"]["conversation_id"], "conv");
        assert!(value["links"]["context_of"].as_array().unwrap().is_empty());
    }
}
