//! Request, response, and pricing types for single-prompt model calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    /// Canned responses, no network
    Scripted,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::Scripted => write!(f, "scripted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl Pricing {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// A model a client can price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    pub pricing: Pricing,
}

impl ModelSpec {
    pub fn anthropic(id: impl Into<String>, input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            id: id.into(),
            provider: Provider::Anthropic,
            pricing: Pricing {
                input_per_m,
                output_per_m,
            },
        }
    }

    /// Small and cheap; recursive queries run many times per recall.
    pub fn query_default() -> Self {
        Self::anthropic("claude-3-5-haiku-20241022", 0.8, 4.0)
    }

    /// Priced Anthropic models, cheapest first.
    pub fn anthropic_models() -> Vec<Self> {
        vec![
            Self::query_default(),
            Self::anthropic("claude-3-5-sonnet-20241022", 3.0, 15.0),
        ]
    }

    /// Whether a model name reported by the API refers to this spec.
    pub fn matches(&self, reported: &str) -> bool {
        reported == self.id || reported.starts_with(&self.id)
    }
}

/// One prompt sent as a single user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Overrides the client's default model
    pub model: Option<String>,
    pub system: Option<String>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            system: None,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

/// A priced completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub model: String,
    pub text: String,
    pub usage: TokenUsage,
    /// Cost of this call alone
    pub cost_usd: f64,
    /// The model hit `max_tokens` before finishing
    pub truncated: bool,
}

/// Running spend across calls, per model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTracker {
    pub calls: u64,
    pub usage: TokenUsage,
    pub total_cost: f64,
    pub by_model: BTreeMap<String, f64>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost_usd: f64) {
        self.calls += 1;
        self.usage.input_tokens += usage.input_tokens;
        self.usage.output_tokens += usage.output_tokens;
        self.total_cost += cost_usd;
        *self.by_model.entry(model.to_string()).or_default() += cost_usd;
    }

    pub fn mean_cost(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_cost / self.calls as f64
        }
    }
}
