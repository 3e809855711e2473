//! LLM transport - chat/tool-calling types and providers
//!
//! The agent loop only sees `ChatMessage`/`ChatResponse` and the `LlmProvider`
//! trait; provider-specific wire formats (Gemini functionCall parts, OpenAI
//! tool_calls) stay inside their modules. Continuation state a provider
//! attaches to a tool call (`opaque_state`) is carried byte-for-byte and
//! never parsed.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatProvider;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Which provider backend to talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmBackend {
    Gemini,
    OpenAiCompat { endpoint: String },
}

/// Model transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Gemini,
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            max_tokens: 8192,
            temperature: 0.3,
        }
    }
}

/// Generation parameters passed to a provider per call.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl From<&LlmConfig> for GenerationConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A chat message with role, content, and optional tool call metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (only present when role=Assistant)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (only present when role=Tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool (only present when role=Tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque continuation token echoed back with a tool result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opaque_state: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            opaque_state: None,
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            opaque_state: None,
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            opaque_state: None,
        }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
            opaque_state: None,
        }
    }
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        opaque_state: Option<String>,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            opaque_state,
        }
    }
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (used to correlate with tool result)
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// JSON arguments string
    pub arguments: String,
    /// Provider-specific continuation state; must be echoed back verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opaque_state: Option<String>,
}

/// Schema describing a tool the model can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: JsonValue,
}

/// The result of a chat completion - either text content or tool call requests.
#[derive(Debug, Clone)]
pub enum ChatResponse {
    /// Model produced text content (final answer)
    Content(String),
    /// Model wants to call tools before answering
    ToolCalls(Vec<ToolCall>),
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_tools: bool,
}

/// Core trait for model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Chat completion with full message history and optional tool schemas.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse>;

    fn info(&self) -> ProviderInfo;
}

/// Holds the configured provider and applies per-call generation settings.
pub struct LlmManager {
    config: LlmConfig,
    provider: Box<dyn LlmProvider>,
}

impl LlmManager {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let provider: Box<dyn LlmProvider> = match &config.backend {
            LlmBackend::Gemini => Box::new(GeminiProvider::new(
                config.api_key.clone(),
                config.model.clone(),
            )?),
            LlmBackend::OpenAiCompat { endpoint } => Box::new(OpenAiCompatProvider::new(
                endpoint.clone(),
                config.api_key.clone(),
                config.model.clone(),
            )?),
        };
        Ok(Self { config, provider })
    }

    /// Use an already-built provider (test seam and custom backends).
    pub fn with_provider(config: LlmConfig, provider: Box<dyn LlmProvider>) -> Self {
        Self { config, provider }
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatResponse> {
        let config = GenerationConfig::from(&self.config);
        self.provider.chat(messages, tools, &config).await
    }

    pub fn info(&self) -> ProviderInfo {
        self.provider.info()
    }
}

/// Parse a response body as JSON, returning a clear error if the server
/// returned HTML (gateway/outage pages are common enough to special-case).
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') || trimmed.starts_with("<!") {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}) - service may be down. Response: {}",
            endpoint,
            status,
            preview
        ));
    }
    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

/// Shared reqwest client construction for providers.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(15))
        .timeout(std::time::Duration::from_secs(300))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()?)
}

/// Map a transport-level reqwest error to an actionable message.
pub(crate) fn transport_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("Request to {} timed out - check network connectivity", endpoint)
    } else if e.is_connect() {
        anyhow!(
            "Failed to connect to {} - check network/firewall/proxy: {}",
            endpoint,
            e
        )
    } else {
        anyhow!("Request to {} failed: {}", endpoint, e)
    }
}
