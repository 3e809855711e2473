//! Tool Dispatcher - the three data-access tools exposed to the model
//!
//! A fixed switch over exactly three tool names. Everything that can go wrong
//! here (unknown tool, malformed arguments, unknown table, store failure)
//! degrades to a structured JSON error payload: the loop controller must
//! always receive something serializable to hand back to the model, which is
//! expected to retry with corrected arguments on its next turn.

use serde_json::{json, Value as JsonValue};

use crate::error::QueryError;
use crate::llm::ToolSchema;
use crate::schema::SchemaRegistry;
use crate::store::{execute_aggregation, execute_query, AggregationSpec, QuerySpec, Store};

pub const TOOL_GET_SCHEMA: &str = "get_database_schema";
pub const TOOL_QUERY_TABLE: &str = "query_table";
pub const TOOL_AGGREGATE: &str = "aggregate_data";

/// Tool catalog sent to the model alongside the conversation.
pub fn tool_schemas() -> Vec<ToolSchema> {
    let filter_schema = json!({
        "type": "array",
        "description": "Filter clauses, AND-combined",
        "items": {
            "type": "object",
            "properties": {
                "column": {"type": "string"},
                "operator": {
                    "type": "string",
                    "enum": ["eq", "neq", "gt", "gte", "lt", "lte", "like", "ilike"]
                },
                "value": {"type": "string"}
            },
            "required": ["column", "operator", "value"]
        }
    });
    let date_range_schema = json!({
        "type": "object",
        "description": "Inclusive date range applied to the table's date column",
        "properties": {
            "start_date": {"type": "string", "description": "YYYY-MM-DD"},
            "end_date": {"type": "string", "description": "YYYY-MM-DD"}
        },
        "required": ["start_date", "end_date"]
    });

    vec![
        ToolSchema {
            name: TOOL_GET_SCHEMA.to_string(),
            description: "Look up the database schema. Without table_name, lists every \
                          table with its columns; with table_name, returns that table's \
                          full descriptor including column types and join hints. Call \
                          this first when unsure which table or column to use."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_name": {
                        "type": "string",
                        "description": "Optional: specific table to describe"
                    }
                }
            }),
        },
        ToolSchema {
            name: TOOL_QUERY_TABLE.to_string(),
            description: "Query rows from a table with optional filters, date range, \
                          ordering and limit. Results are capped at 100 rows."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string"},
                    "select_columns": {
                        "type": "string",
                        "description": "Comma-separated columns; omit for all columns"
                    },
                    "filters": filter_schema,
                    "date_range": date_range_schema,
                    "order_by": {
                        "type": "object",
                        "properties": {
                            "column": {"type": "string"},
                            "ascending": {"type": "boolean"}
                        },
                        "required": ["column"]
                    },
                    "limit": {"type": "integer", "description": "Max rows, capped at 100"}
                },
                "required": ["table_name"]
            }),
        },
        ToolSchema {
            name: TOOL_AGGREGATE.to_string(),
            description: "Compute grouped or global aggregations (sum, avg, count, min, \
                          max) over a table, with the same filter and date-range \
                          vocabulary as query_table."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string"},
                    "aggregations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "column": {"type": "string"},
                                "function": {
                                    "type": "string",
                                    "enum": ["sum", "avg", "count", "min", "max"]
                                },
                                "alias": {"type": "string"}
                            },
                            "required": ["column", "function"]
                        }
                    },
                    "group_by": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Columns to group by; omit for one global row"
                    },
                    "filters": filter_schema,
                    "date_range": date_range_schema
                },
                "required": ["table_name", "aggregations"]
            }),
        },
    ]
}

/// Execute one named tool invocation. The tenant id comes from the caller's
/// auth context and is never read from `args`. Always returns a JSON string.
pub fn dispatch_tool(
    store: &Store,
    registry: &SchemaRegistry,
    tenant_id: &str,
    tool_name: &str,
    args: &JsonValue,
) -> String {
    let payload = match tool_name {
        TOOL_GET_SCHEMA => {
            let table_name = args.get("table_name").and_then(|v| v.as_str());
            registry.describe(table_name)
        }
        TOOL_QUERY_TABLE => match serde_json::from_value::<QuerySpec>(args.clone()) {
            Ok(spec) => match execute_query(store, registry, tenant_id, &spec) {
                Ok(output) => serde_json::to_value(output)
                    .unwrap_or_else(|e| json!({"error": format!("serialization failed: {}", e)})),
                Err(err) => err.to_tool_json(),
            },
            Err(e) => QueryError::MalformedArguments(e.to_string()).to_tool_json(),
        },
        TOOL_AGGREGATE => match serde_json::from_value::<AggregationSpec>(args.clone()) {
            Ok(spec) => match execute_aggregation(store, registry, tenant_id, &spec) {
                Ok(output) => serde_json::to_value(output)
                    .unwrap_or_else(|e| json!({"error": format!("serialization failed: {}", e)})),
                Err(err) => err.to_tool_json(),
            },
            Err(e) => QueryError::MalformedArguments(e.to_string()).to_tool_json(),
        },
        other => json!({"error": format!("Unknown tool: {}", other)}),
    };

    if let Some(error) = payload.get("error").and_then(|e| e.as_str()) {
        tracing::warn!(tool = tool_name, error, "tool call returned error payload");
    } else {
        tracing::debug!(tool = tool_name, "tool call ok");
    }
    payload.to_string()
}
