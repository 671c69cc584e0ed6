//! Model access for recursive queries.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meridian_core::llm::{AnthropicClient, BlockingProvider, ClientConfig, QueryProvider};
//!
//! let client = AnthropicClient::new(ClientConfig::from_env()?)?;
//! let provider = BlockingProvider::new(Arc::new(client))?;
//! let reply = provider.query("Summarize the user's editor preferences")?;
//! println!("{} (${:.4})", reply.text, reply.cost_usd);
//! ```

mod client;
mod provider;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient};
pub use provider::{BlockingProvider, QueryProvider, QueryResponse, ScriptedProvider};
pub use types::{
    CompletionRequest, CompletionResponse, CostTracker, ModelSpec, Pricing, Provider, TokenUsage,
};
