//! OpenAI-compatible provider (chat completions with tool calling).
//!
//! Works against any endpoint speaking the chat-completions wire format.
//! These providers have no continuation-state mechanism, so `opaque_state`
//! stays `None` on emitted tool calls.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::{
    build_http_client, parse_json_response, transport_error, ChatMessage, ChatResponse, ChatRole,
    GenerationConfig, LlmProvider, ProviderInfo, ToolCall, ToolSchema,
};

pub struct OpenAiCompatProvider {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(endpoint: String, api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            endpoint,
            api_key,
            model,
            client: build_http_client()?,
        })
    }
}

fn build_messages(messages: &[ChatMessage]) -> Vec<JsonValue> {
    messages
        .iter()
        .map(|message| match message.role {
            ChatRole::System => json!({
                "role": "system",
                "content": message.content.clone().unwrap_or_default(),
            }),
            ChatRole::User => json!({
                "role": "user",
                "content": message.content.clone().unwrap_or_default(),
            }),
            ChatRole::Assistant => match &message.tool_calls {
                Some(tool_calls) => {
                    let calls: Vec<JsonValue> = tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments},
                            })
                        })
                        .collect();
                    json!({"role": "assistant", "content": JsonValue::Null, "tool_calls": calls})
                }
                None => json!({
                    "role": "assistant",
                    "content": message.content.clone().unwrap_or_default(),
                }),
            },
            ChatRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.clone().unwrap_or_default(),
            }),
        })
        .collect()
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let mut request = json!({
            "model": self.model,
            "messages": build_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "stream": false,
        });
        if !tools.is_empty() {
            let declarations: Vec<JsonValue> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            request["tools"] = json!(declarations);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: CompletionResponse = parse_json_response(response, &self.endpoint).await?;
        let message = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow!("model returned empty choices array"))?;

        if message.tool_calls.is_empty() {
            Ok(ChatResponse::Content(message.content.unwrap_or_default()))
        } else {
            let tool_calls = message
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                    opaque_state: None,
                })
                .collect();
            Ok(ChatResponse::ToolCalls(tool_calls))
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "OpenAI-compatible".to_string(),
            model: self.model.clone(),
            supports_tools: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_tool_roundtrip() {
        let messages = vec![
            ChatMessage::user("how much revenue?"),
            ChatMessage::assistant_tool_calls(vec![ToolCall {
                id: "tc_1".into(),
                name: "aggregate_data".into(),
                arguments: r#"{"table_name":"payments"}"#.into(),
                opaque_state: None,
            }]),
            ChatMessage::tool_result("tc_1", "aggregate_data", r#"{"total_rows":3}"#, None),
        ];
        let wire = build_messages(&messages);
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "aggregate_data");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "tc_1");
    }
}
