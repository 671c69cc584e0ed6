//! Durable chunk storage.
//!
//! A chunk is an immutable piece of remembered text with a type, tags, and
//! metadata. Only its link lists change after creation, and chunks are never
//! deleted.
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_core::memory::{ChunkStore, ChunkType, NewChunk, ChunkFilter};
//!
//! let store = ChunkStore::open("/var/lib/meridian")?;
//! let chunk = store.create_chunk(
//!     NewChunk::new("User prefers VS Code", ChunkType::Preference, "conv-1", 5)
//!         .with_tags(["editor"]),
//! )?;
//! let ids = store.list_chunks(&ChunkFilter::new().tag("editor"))?;
//! ```

mod index;
mod store;
mod types;

pub use index::{ChunkIndex, OrderEntry};
pub use store::{ChunkFilter, ChunkStore, NewChunk, StoreStats, DEFAULT_CONFIDENCE};
pub use types::{normalize_tags, Chunk, ChunkId, ChunkLinks, ChunkMetadata, ChunkType, LinkType};
