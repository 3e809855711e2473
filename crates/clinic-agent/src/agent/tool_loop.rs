//! Conversation Loop Controller
//!
//! Owns one request's exchange with the model: seeds system instructions +
//! history + the user message, sends the conversation with the tool catalog,
//! executes any requested tool calls, appends results, and loops until the
//! model produces text or the iteration cap forces a final no-tools call.
//!
//! Tool calls within one model turn are dispatched sequentially and their
//! results appended in request order; reordering them would corrupt the
//! conversation the model reasons over. Conversation state lives entirely in
//! this function's stack, so concurrent requests share nothing mutable.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::tools::{dispatch_tool, tool_schemas};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatResponse, LlmManager};
use crate::schema::SchemaRegistry;
use crate::store::{DateRange, Store};

/// Returned when the model cannot be coaxed into a usable text answer.
pub const FALLBACK_ANSWER: &str =
    "요청하신 분석을 완료하지 못했습니다. 질문을 조금 더 구체적으로 다시 시도해 주세요.";

const DEFAULT_SYSTEM_PROMPT: &str = "\
당신은 병원 운영 데이터를 분석하는 어시스턴트입니다. You answer questions about \
clinic operations (patients, appointments, payments, inventory, staff, reviews) \
using exactly three tools: get_database_schema, query_table, aggregate_data. \
Rules: (1) when unsure about tables or columns, call get_database_schema first; \
(2) prefer aggregate_data for totals, averages and counts instead of fetching \
raw rows; (3) if a tool returns an error payload, correct your arguments and \
retry; (4) answer in the user's language, citing concrete numbers from tool \
results; (5) never invent data that did not come from a tool result.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One prior turn re-supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

/// Pre-rendered summary of an uploaded file; parsing happens upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedFile {
    pub name: String,
    #[serde(rename = "renderedSummary")]
    pub rendered_summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Supplied by the caller's auth context, never by the model.
    pub tenant_id: String,
    pub message: String,
    #[serde(default, rename = "conversationHistory")]
    pub conversation_history: Vec<HistoryTurn>,
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<DateRange>,
    #[serde(default, rename = "attachedFiles")]
    pub attached_files: Vec<AttachedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutput {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AgentEngine {
    llm: LlmManager,
    store: Store,
    registry: SchemaRegistry,
    max_iterations: usize,
    system_prompt: String,
}

impl AgentEngine {
    pub fn new(llm: LlmManager, store: Store, registry: SchemaRegistry) -> Self {
        Self {
            llm,
            store,
            registry,
            max_iterations: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Build the engine from config: opens the store, constructs the provider,
    /// and loads the default table catalog.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let llm = LlmManager::new(config.llm.clone())?;
        let store = Store::open(&config.store_path)?;
        let registry = SchemaRegistry::with_default_tables();
        store.ensure_schema(&registry)?;
        let mut engine = Self::new(llm, store, registry);
        engine.max_iterations = config.agent.max_iterations;
        if let Some(prompt) = &config.agent.system_prompt {
            engine.system_prompt = prompt.clone();
        }
        Ok(engine)
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Main entry point. Tool and store errors are mediated through the model;
    /// only model transport failures surface here, as `error` with an empty
    /// `message`.
    pub async fn handle(&self, request: ChatRequest) -> ChatOutput {
        match self.run(&request).await {
            Ok(message) => ChatOutput {
                message,
                error: None,
            },
            Err(e) => {
                tracing::error!(tenant = %request.tenant_id, error = %e, "chat request failed");
                ChatOutput {
                    message: String::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run(&self, request: &ChatRequest) -> Result<String> {
        let mut messages = self.seed_messages(request);
        let tools = tool_schemas();

        for iteration in 1..=self.max_iterations {
            let response = self.llm.chat(&messages, &tools).await?;
            match response {
                ChatResponse::Content(text) => {
                    tracing::debug!(iteration, "model returned final text");
                    return Ok(non_empty_or_fallback(text));
                }
                ChatResponse::ToolCalls(tool_calls) => {
                    tracing::info!(
                        iteration,
                        count = tool_calls.len(),
                        tools = ?tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>(),
                        "model requested tool calls"
                    );

                    // The model's own turn goes back verbatim, continuation
                    // state included, so it can see its prior reasoning.
                    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

                    for tool_call in &tool_calls {
                        let started = std::time::Instant::now();
                        let args = serde_json::from_str(&tool_call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        let output = dispatch_tool(
                            &self.store,
                            &self.registry,
                            &request.tenant_id,
                            &tool_call.name,
                            &args,
                        );
                        tracing::debug!(
                            tool = %tool_call.name,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "tool call complete"
                        );
                        messages.push(ChatMessage::tool_result(
                            &tool_call.id,
                            &tool_call.name,
                            &output,
                            tool_call.opaque_state.clone(),
                        ));
                    }
                }
            }
        }

        // Cap reached: one final call without tool access forces text.
        tracing::warn!(
            max = self.max_iterations,
            "iteration cap reached, forcing text-only answer"
        );
        let response = self.llm.chat(&messages, &[]).await?;
        let text = match response {
            ChatResponse::Content(text) => text,
            ChatResponse::ToolCalls(_) => String::new(),
        };
        Ok(non_empty_or_fallback(text))
    }

    fn seed_messages(&self, request: &ChatRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];

        for turn in &request.conversation_history {
            messages.push(match turn.role {
                HistoryRole::User => ChatMessage::user(&turn.content),
                HistoryRole::Assistant => ChatMessage::assistant(&turn.content),
            });
        }

        let mut user_text = request.message.clone();
        // Callers usually supply the range explicitly; when they don't, a
        // Korean date phrase in the message itself ("최근 3개월", "올해") is
        // promoted to the same hint.
        let range = request
            .date_range
            .or_else(|| crate::dates::parse_date_phrase(&request.message));
        if let Some(range) = &range {
            user_text.push_str(&format!(
                "\n\n[조회 기간: {} ~ {}]",
                range.start_date, range.end_date
            ));
        }
        for file in &request.attached_files {
            user_text.push_str(&format!(
                "\n\n[첨부 파일: {}]\n{}",
                file.name, file.rendered_summary
            ));
        }
        messages.push(ChatMessage::user(user_text));
        messages
    }
}

fn non_empty_or_fallback(text: String) -> String {
    if text.trim().is_empty() {
        FALLBACK_ANSWER.to_string()
    } else {
        text
    }
}
