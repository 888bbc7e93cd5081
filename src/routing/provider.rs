//! Model provider contract and the Anthropic implementation.

use async_trait::async_trait;
use futures::stream::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::costs::PricingTable;
use crate::error::{Error, Result};
use crate::routing::types::ModelTier;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Completion returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model_id: String,
    pub content: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

/// Stream of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An LLM provider serving the closed tier set.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &'static str;

    /// Generate a completion.
    async fn complete(
        &self,
        model: ModelTier,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<CompletionResponse>;

    /// Stream a completion. The default yields the full response as one chunk.
    async fn stream_complete(
        &self,
        model: ModelTier,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<CompletionStream> {
        let response = self
            .complete(model, messages, temperature, max_tokens)
            .await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Count tokens for a text. The default uses the chars/4 estimate.
    async fn count_tokens(&self, text: &str, _model: ModelTier) -> Result<u64> {
        Ok((text.chars().count() / 4) as u64)
    }

    /// Whether a model is currently usable. Probe failures report `false`.
    async fn is_available(&self, model: ModelTier) -> bool;
}

/// Configuration for the Anthropic provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    config: ProviderConfig,
    pricing: PricingTable,
    http: Client,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ProviderConfig, pricing: PricingTable) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            pricing,
            http,
        })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: ModelTier,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<CompletionResponse> {
        let pricing = self.pricing.get(model);

        // System messages ride in the dedicated field
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone());
        let api_messages: Vec<AnthropicMessage> = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::System => return None,
                };
                Some(AnthropicMessage {
                    role: role.to_string(),
                    content: m.content.clone(),
                })
            })
            .collect();

        let request = AnthropicRequest {
            model: pricing.model_id.clone(),
            messages: api_messages,
            max_tokens: max_tokens.unwrap_or(pricing.max_output_tokens),
            system,
            temperature: Some(temperature.clamp(0.0, 1.0)),
        };

        let url = format!("{}/v1/messages", self.base_url());
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout_secs * 1000)
                } else {
                    Error::provider("anthropic", format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                "anthropic",
                format!("API error ({}): {}", status, body),
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::provider("anthropic", format!("Invalid response: {}", e)))?;

        debug!(
            model = %api_response.model,
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "completion received"
        );

        Ok(CompletionResponse {
            id: api_response.id,
            model_id: api_response.model,
            content: api_response
                .content
                .into_iter()
                .filter_map(|c| c.text)
                .collect::<Vec<_>>()
                .join(""),
            stop_reason: api_response.stop_reason,
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        })
    }

    async fn is_available(&self, model: ModelTier) -> bool {
        if self.config.api_key.is_empty() {
            warn!(model = %model, "no API key configured, model unavailable");
            return false;
        }
        // The tier set is closed; with credentials present every tier is
        // routable and request-time failures follow the degradation rules.
        true
    }
}

/// Deterministic provider for tests and offline development.
///
/// Serves a canned response and reports availability from a fixed set.
pub struct StaticProvider {
    content: String,
    unavailable: Vec<ModelTier>,
}

impl StaticProvider {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            unavailable: Vec::new(),
        }
    }

    pub fn with_unavailable(mut self, tiers: Vec<ModelTier>) -> Self {
        self.unavailable = tiers;
        self
    }
}

#[async_trait]
impl ModelProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn complete(
        &self,
        model: ModelTier,
        messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: Option<u32>,
    ) -> Result<CompletionResponse> {
        if self.unavailable.contains(&model) {
            return Err(Error::Unavailable(model.to_string()));
        }

        let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        Ok(CompletionResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: model.to_string(),
            content: self.content.clone(),
            stop_reason: Some("end_turn".to_string()),
            usage: TokenUsage {
                input_tokens: (input_chars / 4) as u64,
                output_tokens: (self.content.chars().count() / 4) as u64,
            },
        })
    }

    async fn is_available(&self, model: ModelTier) -> bool {
        !self.unavailable.contains(&model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_static_provider_complete() {
        let provider = StaticProvider::new("canned answer");
        let response = provider
            .complete(
                ModelTier::Small,
                &[ChatMessage::user("hello there friend")],
                0.7,
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.content, "canned answer");
        assert_eq!(response.model_id, "small");
        assert!(response.usage.input_tokens > 0);
    }

    #[tokio::test]
    async fn test_static_provider_availability() {
        let provider = StaticProvider::new("x").with_unavailable(vec![ModelTier::Large]);
        assert!(provider.is_available(ModelTier::Small).await);
        assert!(!provider.is_available(ModelTier::Large).await);
        assert!(matches!(
            provider
                .complete(ModelTier::Large, &[ChatMessage::user("q")], 0.7, None)
                .await,
            Err(Error::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        let provider = StaticProvider::new("streamed");
        let mut stream = provider
            .stream_complete(ModelTier::Small, &[ChatMessage::user("q")], 0.7, None)
            .await
            .unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk, "streamed");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_default_token_count() {
        let provider = StaticProvider::new("x");
        let count = provider
            .count_tokens(&"a".repeat(400), ModelTier::Small)
            .await
            .unwrap();
        assert_eq!(count, 100);
    }

    #[tokio::test]
    async fn test_anthropic_unavailable_without_key() {
        let provider =
            AnthropicProvider::new(ProviderConfig::new(""), PricingTable::default()).unwrap();
        assert!(!provider.is_available(ModelTier::Large).await);
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }
}
