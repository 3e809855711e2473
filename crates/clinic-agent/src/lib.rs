pub mod agent;
pub mod config;
pub mod dates;
pub mod error;
pub mod llm;
pub mod schema;
pub mod store;

// Re-export primary types for convenience
pub use agent::{AgentEngine, ChatOutput, ChatRequest};
pub use config::AgentConfig;
pub use error::QueryError;
pub use schema::{ColumnType, SchemaRegistry, TableDescriptor};
pub use store::{
    AggFunc, Aggregation, AggregationSpec, DateRange, FilterClause, FilterOp, OrderBy, QuerySpec,
    Store,
};

// Re-export LLM types
pub use llm::{
    ChatMessage, ChatResponse, ChatRole, LlmBackend, LlmConfig, LlmManager, LlmProvider,
    ProviderInfo, ToolCall, ToolSchema,
};

// Re-export common types
pub use anyhow::{Error, Result};
