//! Error taxonomy for the query/aggregation layer.
//!
//! Everything in `QueryError` is recoverable from the model's point of view:
//! the dispatcher serializes it to a JSON error payload and the model retries
//! with corrected arguments on the next turn. Model transport failures stay
//! `anyhow::Error` and terminate the request.

use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("malformed tool arguments: {0}")]
    MalformedArguments(String),

    #[error("store error: {0}")]
    Store(String),
}

impl QueryError {
    /// JSON payload handed back to the model so it can self-correct.
    pub fn to_tool_json(&self) -> serde_json::Value {
        match self {
            QueryError::UnknownTable(name) => json!({
                "error": format!("unknown table: {}", name),
                "hint": "call get_database_schema to list available tables",
            }),
            QueryError::UnknownColumn { table, column } => json!({
                "error": format!("unknown column '{}' on table '{}'", column, table),
                "hint": format!("call get_database_schema with table_name='{}' to list its columns", table),
            }),
            QueryError::MalformedArguments(msg) => json!({
                "error": format!("malformed arguments: {}", msg),
            }),
            QueryError::Store(msg) => json!({
                "error": format!("query failed: {}", msg),
            }),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_table_payload_has_error_key() {
        let payload = QueryError::UnknownTable("ghosts".into()).to_tool_json();
        assert!(payload["error"].as_str().unwrap().contains("ghosts"));
        assert!(payload["hint"].is_string());
    }
}
