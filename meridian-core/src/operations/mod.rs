//! Remember, recall, and reason over the chunk store.

pub mod reason;
pub mod recall;
pub mod remember;
pub mod search;

pub use reason::{reason, AnalysisType, Evidence, ReasonResult};
pub use recall::{direct_search, recall_prompt, RecallOperation, RecallOptions, RecallResult};
pub use remember::{estimate_tokens, remember, split_content, RememberRequest, RememberResult};
pub use search::{expand_query, score_chunk, search, SearchHit, SearchOptions};
