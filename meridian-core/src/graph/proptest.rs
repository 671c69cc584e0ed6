//! Property-based tests for link graph invariants.
//!
//! - `add_link` is idempotent
//! - every forward edge has exactly one matching reverse entry
//! - traversal never returns its start and grows monotonically with depth
