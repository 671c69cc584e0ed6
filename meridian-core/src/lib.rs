//! # meridian-core
//!
//! Persistent, graph-linked memory for conversational agents, with a
//! budgeted sandbox in which a model writes its own retrieval code.
//!
//! ## Core Components
//!
//! - **Memory**: Chunks on disk with a tag/conversation/time index
//! - **Graph**: Auto-generated and manual links between chunks
//! - **Sandbox**: Parser, policy, and interpreter for agent-written code
//! - **Operations**: Remember, recall, and reason
//! - **Cache**: Memory and disk tiers for repeated lookups
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_core::{Brain, MeridianConfig, RememberRequest};
//!
//! let brain = Brain::open(MeridianConfig::new("~/.meridian"))?;
//! let stored = brain.remember(
//!     RememberRequest::new("User prefers VS Code", "conv-1").with_tags(["editor"]),
//! );
//! assert!(stored.success, "{:?}", stored.error);
//!
//! let result = brain.recall("editor", &brain.recall_options())?;
//! println!("{} ({:.2})", result.answer, result.confidence);
//! ```

pub mod brain;
pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod operations;
pub mod sandbox;

// Re-exports for convenience
pub use brain::{Brain, BrainStats};
pub use cache::{CacheKey, CacheManager, CacheManagerStats};
pub use config::{
    CacheConfig, LinkingConfig, MeridianConfig, RecallConfig, RememberConfig, SessionConfig,
};
pub use error::{Error, Result};
pub use graph::{AutoLinker, Contradiction, LinkGraph};
pub use llm::{
    AnthropicClient, BlockingProvider, ClientConfig, LLMClient, QueryProvider, QueryResponse,
    ScriptedProvider,
};
pub use memory::{
    Chunk, ChunkFilter, ChunkId, ChunkLinks, ChunkMetadata, ChunkStore, ChunkType, LinkType,
    NewChunk, StoreStats,
};
pub use operations::{
    AnalysisType, Evidence, ReasonResult, RecallOperation, RecallOptions, RecallResult,
    RememberRequest, RememberResult, SearchHit, SearchOptions,
};
pub use sandbox::{MemoryHost, Namespace, Session, SessionState, SessionStatus, StoreHost};
