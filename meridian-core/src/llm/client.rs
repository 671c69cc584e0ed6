//! Async model client trait and the Anthropic Messages implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::{CompletionRequest, CompletionResponse, ModelSpec, Provider, TokenUsage};

/// Async completion client.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    fn provider(&self) -> Provider;

    /// Models this client can price.
    fn models(&self) -> Vec<ModelSpec>;
}

/// Connection settings for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 60,
        }
    }

    /// `ANTHROPIC_API_KEY`, plus `MERIDIAN_QUERY_MODEL` if set.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        let mut config = Self::new(key);
        if let Ok(model) = std::env::var("MERIDIAN_QUERY_MODEL") {
            config.default_model = Some(model);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::llm_api("anthropic", format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}/v1/messages", base)
    }

    fn body(&self, request: CompletionRequest) -> MessagesBody {
        let model = request
            .model
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| ModelSpec::query_default().id);
        MessagesBody {
            model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: vec![UserTurn {
                role: "user",
                content: request.prompt,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<UserTurn>,
}

#[derive(Debug, Serialize)]
struct UserTurn {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Turn a successful Messages API body into a priced response. Unknown
/// models are priced at zero with a warning.
fn parse_reply(body: &str, models: &[ModelSpec]) -> Result<CompletionResponse> {
    let reply: MessagesReply = serde_json::from_str(body)
        .map_err(|e| Error::llm_api("anthropic", format!("Failed to parse response: {}", e)))?;

    let text: String = reply
        .content
        .iter()
        .filter_map(|block| block.text.as_deref())
        .collect();
    let cost_usd = match models.iter().find(|m| m.matches(&reply.model)) {
        Some(spec) => spec.pricing.cost(&reply.usage),
        None => {
            warn!(model = %reply.model, "No pricing for model, recording zero cost");
            0.0
        }
    };

    Ok(CompletionResponse {
        truncated: reply.stop_reason.as_deref() == Some("max_tokens"),
        model: reply.model,
        text,
        usage: reply.usage,
        cost_usd,
    })
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.body(request);
        debug!(model = %body.model, max_tokens = body.max_tokens, "Sending completion request");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorReply>(&text) {
                Ok(reply) => format!("{}: {}", reply.error.kind, reply.error.message),
                Err(_) => format!("{}: {}", status, text),
            };
            return Err(Error::llm_api("anthropic", message));
        }

        parse_reply(&text, &self.models())
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn models(&self) -> Vec<ModelSpec> {
        ModelSpec::anthropic_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://proxy.internal/")
            .with_default_model("claude-3-5-sonnet-20241022")
            .with_timeout(5);

        let client = AnthropicClient::new(config).unwrap();
        assert_eq!(client.endpoint(), "https://proxy.internal/v1/messages");
        assert_eq!(client.config.timeout_secs, 5);
    }

    #[test]
    fn test_body_is_one_user_turn() {
        let client = AnthropicClient::new(ClientConfig::new("k")).unwrap();
        let body = client.body(CompletionRequest::new("hello").with_system("sys"));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], ModelSpec::query_default().id);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["system"], "sys");
        assert_eq!(json["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_reply_prices_call() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude-3-5-haiku-20241022",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1000000, "output_tokens": 0}
        }"#;
        let response = parse_reply(body, &ModelSpec::anthropic_models()).unwrap();

        assert_eq!(response.text, "Hello there");
        assert!(response.truncated);
        assert!((response.cost_usd - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        let body = r#"{"model": "mystery", "content": [], "stop_reason": null,
            "usage": {"input_tokens": 10, "output_tokens": 10}}"#;
        let response = parse_reply(body, &ModelSpec::anthropic_models()).unwrap();
        assert_eq!(response.cost_usd, 0.0);
        assert!(!response.truncated);
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        let err = parse_reply("nope", &[]).unwrap_err();
        assert!(matches!(err, Error::LlmApi { .. }));
    }
}
