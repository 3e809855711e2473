//! Embedded relational store (SQLite via rusqlite).
//!
//! The store owns the connection and knows nothing about the agent loop.
//! Every read issued through this module is tenant-scoped by construction;
//! see `query::build_where`.

pub mod aggregate;
pub mod query;

pub use aggregate::{
    execute_aggregation, AggFunc, Aggregation, AggregationOutput, AggregationSpec,
};
pub use query::{
    execute_query, DateRange, FilterClause, FilterOp, OrderBy, QueryOutput, QuerySpec,
};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::QueryError;
use crate::schema::{ColumnType, SchemaRegistry};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueryError::Store(format!("cannot create store dir: {}", e)))?;
        }
        Self::configure(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, QueryError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, QueryError> {
        // `like` is specified as case-sensitive; `ilike` lowers both sides.
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create any missing physical tables for the registry. Every table gets
    /// a `tenant_id` column in addition to its declared columns; that column
    /// is deliberately absent from the registry so the model cannot address it.
    pub fn ensure_schema(&self, registry: &SchemaRegistry) -> Result<(), QueryError> {
        self.with_conn(|conn| {
            for desc in registry.tables() {
                let cols: Vec<String> = desc
                    .columns
                    .iter()
                    .map(|(name, ty)| format!("\"{}\" {}", name, sql_type(*ty)))
                    .collect();
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" (tenant_id TEXT NOT NULL, {})",
                    desc.name,
                    cols.join(", ")
                );
                conn.execute_batch(&ddl)?;
            }
            Ok(())
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| QueryError::Store("store connection poisoned".into()))?;
        f(&conn)
    }
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Boolean => "INTEGER",
        ColumnType::Text | ColumnType::Date | ColumnType::Timestamp => "TEXT",
    }
}

/// Decode one SQLite value into JSON.
pub(crate) fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => JsonValue::from(f),
        ValueRef::Text(bytes) => JsonValue::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::from(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Decode the current row into a JSON object keyed by column name.
pub(crate) fn row_to_json(
    row: &rusqlite::Row<'_>,
    columns: &[String],
) -> Result<JsonMap<String, JsonValue>, QueryError> {
    let mut map = JsonMap::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        let value = row.get_ref(idx)?;
        map.insert(name.clone(), value_to_json(value));
    }
    Ok(map)
}
