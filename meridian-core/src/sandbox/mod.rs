//! Capability-scoped execution of agent-written retrieval code.
//!
//! Agent code is a small Python-flavoured language. It is tokenized, parsed,
//! statically checked against the sandbox policy, and only then interpreted
//! against a closed namespace: safe builtins, the session's own variables, and
//! the memory primitives `read_chunk`, `search_chunks`, `list_chunks_by_tag`,
//! `get_linked_chunks`, `llm_query`, and `FINAL`. Nothing else is reachable,
//! so there is no host-language escape hatch to guard.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meridian_core::config::SessionConfig;
//! use meridian_core::sandbox::{Session, StoreHost};
//!
//! let mut session = Session::new(SessionConfig::default())
//!     .with_host(Arc::new(StoreHost::new(store, graph)));
//! session.execute(
//!     "hits = search_chunks('editor', limit=3)\nFINAL([h['content'] for h in hits])",
//!     None,
//! )?;
//! println!("{:?}", session.retrieve());
//! ```

pub mod ast;
mod builtins;
mod eval;
mod host;
mod lexer;
pub mod parser;
pub mod policy;
mod session;
mod value;

pub use builtins::{Args, BUILTINS};
pub use eval::Namespace;
pub use host::{chunk_to_value, hit_to_value, MemoryHost, StoreHost};
pub use parser::{parse_expression, parse_program};
pub use policy::{BLOCKED_MODULES, FORBIDDEN_NAMES, HOST_PRIMITIVES};
pub use session::{Session, SessionState, SessionStatus};
pub use value::{repr, to_str, MAX_SEQUENCE_LEN};
