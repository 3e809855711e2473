//! Agent - tool dispatch and the conversation loop controller.

pub mod tool_loop;
pub mod tools;

pub use tool_loop::{AgentEngine, AttachedFile, ChatOutput, ChatRequest, HistoryRole, HistoryTurn};
pub use tools::{dispatch_tool, tool_schemas};
