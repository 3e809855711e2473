//! Gemini provider (generateContent with function calling).
//!
//! Gemini attaches a `thoughtSignature` to function-call parts; it must be
//! echoed back unchanged when the conversation is resent, or multi-step
//! reasoning degrades. The signature is stored on `ToolCall::opaque_state`
//! and replayed on the serialized function-call part.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::{
    build_http_client, parse_json_response, transport_error, ChatMessage, ChatResponse, ChatRole,
    GenerationConfig, LlmProvider, ProviderInfo, ToolCall, ToolSchema,
};

pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            api_key,
            model,
            client: build_http_client()?,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

/// Split messages into (system instruction text, Gemini `contents` array).
fn build_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<JsonValue>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<JsonValue> = Vec::new();

    for message in messages {
        match message.role {
            ChatRole::System => {
                if let Some(text) = &message.content {
                    system_parts.push(text.clone());
                }
            }
            ChatRole::User => {
                contents.push(json!({
                    "role": "user",
                    "parts": [{"text": message.content.clone().unwrap_or_default()}],
                }));
            }
            ChatRole::Assistant => {
                if let Some(tool_calls) = &message.tool_calls {
                    let parts: Vec<JsonValue> = tool_calls
                        .iter()
                        .map(|tc| {
                            let args: JsonValue =
                                serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                            let mut part = json!({
                                "functionCall": {"name": tc.name, "args": args},
                            });
                            if let Some(signature) = &tc.opaque_state {
                                part["thoughtSignature"] = json!(signature);
                            }
                            part
                        })
                        .collect();
                    contents.push(json!({"role": "model", "parts": parts}));
                } else {
                    contents.push(json!({
                        "role": "model",
                        "parts": [{"text": message.content.clone().unwrap_or_default()}],
                    }));
                }
            }
            ChatRole::Tool => {
                let response: JsonValue = message
                    .content
                    .as_deref()
                    .and_then(|c| serde_json::from_str(c).ok())
                    .unwrap_or_else(|| json!({"result": message.content}));
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": message.name.clone().unwrap_or_default(),
                            "response": response,
                        }
                    }],
                }));
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, contents)
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
    #[serde(rename = "thoughtSignature")]
    thought_signature: Option<String>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: JsonValue,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let endpoint = self.endpoint();
        let (system, contents) = build_contents(messages);

        let mut request = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": config.temperature,
                "maxOutputTokens": config.max_tokens,
            },
        });
        if let Some(system) = system {
            request["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            let declarations: Vec<JsonValue> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            request["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error ({}): {}", status, error));
        }

        let result: GenerateResponse = parse_json_response(response, &endpoint).await?;
        let parts = result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut text = String::new();
        for (idx, part) in parts.into_iter().enumerate() {
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", idx),
                    name: call.name,
                    arguments: call.args.to_string(),
                    opaque_state: part.thought_signature,
                });
            } else if let Some(t) = part.text {
                text.push_str(&t);
            }
        }

        if tool_calls.is_empty() {
            Ok(ChatResponse::Content(text))
        } else {
            tracing::debug!(count = tool_calls.len(), "Gemini requested function calls");
            Ok(ChatResponse::ToolCalls(tool_calls))
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Gemini".to_string(),
            model: self.model.clone(),
            supports_tools: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_contents_replays_thought_signature() {
        let messages = vec![
            ChatMessage::system("you are helpful"),
            ChatMessage::user("query something"),
            ChatMessage::assistant_tool_calls(vec![ToolCall {
                id: "call_0".into(),
                name: "query_table".into(),
                arguments: r#"{"table_name":"payments"}"#.into(),
                opaque_state: Some("sig-abc".into()),
            }]),
            ChatMessage::tool_result("call_0", "query_table", r#"{"count":0}"#, Some("sig-abc".into())),
        ];
        let (system, contents) = build_contents(&messages);
        assert_eq!(system.as_deref(), Some("you are helpful"));
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["parts"][0]["thoughtSignature"], "sig-abc");
        assert_eq!(
            contents[1]["parts"][0]["functionCall"]["args"]["table_name"],
            "payments"
        );
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["count"],
            0
        );
    }

    #[test]
    fn test_build_contents_plain_exchange() {
        let messages = vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
        ];
        let (system, contents) = build_contents(&messages);
        assert!(system.is_none());
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hi there");
    }
}
