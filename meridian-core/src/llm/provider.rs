//! Synchronous query providers used by sandbox sessions.
//!
//! Sessions are synchronous, so they talk to models through [`QueryProvider`].
//! [`BlockingProvider`] drives any async [`LLMClient`] on a private runtime;
//! [`ScriptedProvider`] replays canned responses for offline runs and tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::client::LLMClient;
use super::types::{CompletionRequest, CostTracker, TokenUsage};
use crate::error::{Error, Result};

/// One model reply with the cost of that call alone.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub text: String,
    pub cost_usd: f64,
}

impl QueryResponse {
    pub fn new(text: impl Into<String>, cost_usd: f64) -> Self {
        Self {
            text: text.into(),
            cost_usd,
        }
    }
}

/// Blocking prompt-in, text-out model access.
pub trait QueryProvider: Send + Sync {
    fn query(&self, prompt: &str) -> Result<QueryResponse>;

    /// Cumulative spend as the provider counts it. Sessions budget from
    /// per-response costs and never read this.
    fn total_cost(&self) -> f64 {
        0.0
    }

    fn name(&self) -> &str;
}

/// Adapts an async [`LLMClient`] to [`QueryProvider`].
///
/// Owns a current-thread tokio runtime. Calling `query` from inside another
/// async runtime returns [`Error::Internal`]; async callers should run the
/// session on a plain `std::thread`.
pub struct BlockingProvider {
    client: Arc<dyn LLMClient>,
    runtime: Runtime,
    model: Option<String>,
    system: Option<String>,
    max_tokens: u32,
    costs: Mutex<CostTracker>,
}

impl BlockingProvider {
    pub fn new(client: Arc<dyn LLMClient>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build runtime: {}", e)))?;
        Ok(Self {
            client,
            runtime,
            model: None,
            system: None,
            max_tokens: 1024,
            costs: Mutex::new(CostTracker::new()),
        })
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
        self.max_tokens = max_tokens;
        self
    }

    /// Snapshot of everything spent through this provider.
    pub fn costs(&self) -> CostTracker {
        self.costs
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl QueryProvider for BlockingProvider {
    fn query(&self, prompt: &str) -> Result<QueryResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Internal(
                "BlockingProvider::query cannot run inside an async runtime".to_string(),
            ));
        }
        let mut request = CompletionRequest::new(prompt).with_max_tokens(self.max_tokens);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }
        if let Some(system) = &self.system {
            request = request.with_system(system.clone());
        }

        let response = self.runtime.block_on(self.client.complete(request))?;
        if let Ok(mut costs) = self.costs.lock() {
            costs.record(&response.model, &response.usage, response.cost_usd);
        }
        if response.truncated {
            warn!(model = %response.model, "Reply cut off at max_tokens");
        }
        debug!(model = %response.model, cost = response.cost_usd, "Provider call complete");

        Ok(QueryResponse {
            text: response.text,
            cost_usd: response.cost_usd,
        })
    }

    fn total_cost(&self) -> f64 {
        self.costs().total_cost
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<String>,
    prompts: Vec<String>,
    costs: CostTracker,
}

/// Replays a fixed sequence of responses at a fixed cost per call.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    cost_per_call: f64,
    failure: Option<String>,
}

impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(Script {
                responses: responses.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            cost_per_call: 0.0,
            failure: None,
        }
    }

    /// A provider whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn with_cost_per_call(mut self, usd: f64) -> Self {
        self.cost_per_call = usd;
        self
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.prompts.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.responses.len()).unwrap_or(0)
    }
}

impl QueryProvider for ScriptedProvider {
    fn query(&self, prompt: &str) -> Result<QueryResponse> {
        if let Some(message) = &self.failure {
            return Err(Error::llm_api("scripted", message.clone()));
        }
        let mut script = self
            .script
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock script: {}", e)))?;
        script.prompts.push(prompt.to_string());

        let text = script
            .responses
            .pop_front()
            .ok_or_else(|| Error::llm_api("scripted", "no scripted responses left"))?;

        let usage = TokenUsage::new((prompt.len() / 4) as u64, (text.len() / 4) as u64);
        script.costs.record("scripted", &usage, self.cost_per_call);

        Ok(QueryResponse {
            text,
            cost_usd: self.cost_per_call,
        })
    }

    fn total_cost(&self) -> f64 {
        self.script
            .lock()
            .map(|s| s.costs.total_cost)
            .unwrap_or(0.0)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
