//! Query Builder - tenant-scoped filtered reads
//!
//! Translates an abstract `QuerySpec` into a parameterized SELECT. Identifier
//! safety: table and column names are only ever taken from the registry after
//! validation, never interpolated from model-supplied strings; all values are
//! bound parameters. The tenant predicate is applied unconditionally and its
//! value comes from the caller, never from a `QuerySpec` field.

use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{row_to_json, Store};
use crate::error::QueryError;
use crate::schema::{ColumnType, SchemaRegistry, TableDescriptor};

/// Hard cap on returned rows, applied even when the model asks for more.
pub const MAX_ROWS: u32 = 100;
pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterClause {
    pub column: String,
    pub operator: FilterOp,
    #[serde(deserialize_with = "de_loose_string")]
    pub value: String,
}

/// Inclusive calendar-date range. On timestamp-typed date columns the bounds
/// are widened to cover the full day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(alias = "startDate")]
    pub start_date: NaiveDate,
    #[serde(alias = "endDate")]
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(rename = "table_name", alias = "table")]
    pub table: String,
    /// Comma-separated column list; defaults to all columns.
    #[serde(default)]
    pub select_columns: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub table: String,
    pub count: usize,
    pub data: Vec<JsonMap<String, JsonValue>>,
}

/// Models emit filter values as strings, numbers, or booleans; accept all and
/// let the store layer coerce by column type.
fn de_loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::String(s) => s,
        other => other.to_string(),
    })
}

pub(crate) struct WhereClause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Build the WHERE clause shared by the Query Builder and the Aggregation
/// Engine: tenant predicate first, then date-range bounds, then filters,
/// all AND-combined.
pub(crate) fn build_where(
    desc: &TableDescriptor,
    tenant_id: &str,
    filters: &[FilterClause],
    date_range: Option<&DateRange>,
) -> Result<WhereClause, QueryError> {
    let mut sql = String::from("tenant_id = ?");
    let mut params: Vec<SqlValue> = vec![SqlValue::Text(tenant_id.to_string())];

    if let (Some(range), Some(date_col)) = (date_range, desc.date_column.as_deref()) {
        let (start, end) = if desc.date_column_is_timestamp() {
            (
                format!("{} 00:00:00", range.start_date),
                format!("{} 23:59:59.999", range.end_date),
            )
        } else {
            (range.start_date.to_string(), range.end_date.to_string())
        };
        sql.push_str(&format!(
            " AND \"{}\" >= ? AND \"{}\" <= ?",
            date_col, date_col
        ));
        params.push(SqlValue::Text(start));
        params.push(SqlValue::Text(end));
    }

    for filter in filters {
        let col_type = desc.column_type(&filter.column).ok_or_else(|| {
            QueryError::UnknownColumn {
                table: desc.name.clone(),
                column: filter.column.clone(),
            }
        })?;
        match filter.operator {
            FilterOp::Like => {
                sql.push_str(&format!(" AND \"{}\" LIKE ?", filter.column));
                params.push(SqlValue::Text(format!("%{}%", filter.value)));
            }
            FilterOp::Ilike => {
                sql.push_str(&format!(" AND LOWER(\"{}\") LIKE LOWER(?)", filter.column));
                params.push(SqlValue::Text(format!("%{}%", filter.value)));
            }
            op => {
                let cmp = match op {
                    FilterOp::Eq => "=",
                    FilterOp::Neq => "!=",
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    FilterOp::Lte => "<=",
                    FilterOp::Like | FilterOp::Ilike => unreachable!(),
                };
                sql.push_str(&format!(" AND \"{}\" {} ?", filter.column, cmp));
                params.push(coerce_param(col_type, &filter.value));
            }
        }
    }

    Ok(WhereClause { sql, params })
}

/// Coerce a string filter value to the column's storage type so comparisons
/// use the right affinity (e.g. a phone number stays text, an amount becomes
/// numeric).
fn coerce_param(col_type: ColumnType, value: &str) -> SqlValue {
    match col_type {
        ColumnType::Integer => value
            .parse::<i64>()
            .map(SqlValue::Integer)
            .unwrap_or_else(|_| SqlValue::Text(value.to_string())),
        ColumnType::Real => value
            .parse::<f64>()
            .map(SqlValue::Real)
            .unwrap_or_else(|_| SqlValue::Text(value.to_string())),
        ColumnType::Boolean => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => SqlValue::Integer(1),
            "false" | "0" => SqlValue::Integer(0),
            _ => SqlValue::Text(value.to_string()),
        },
        ColumnType::Text | ColumnType::Date | ColumnType::Timestamp => {
            SqlValue::Text(value.to_string())
        }
    }
}

/// Resolve the projection: explicit comma-separated list (validated against
/// the descriptor) or all declared columns.
fn resolve_projection(
    desc: &TableDescriptor,
    select_columns: Option<&str>,
) -> Result<Vec<String>, QueryError> {
    match select_columns {
        Some(list) => {
            let cols: Vec<String> = list
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if cols.is_empty() {
                return Ok(desc.columns.keys().cloned().collect());
            }
            for col in &cols {
                if !desc.has_column(col) {
                    return Err(QueryError::UnknownColumn {
                        table: desc.name.clone(),
                        column: col.clone(),
                    });
                }
            }
            Ok(cols)
        }
        None => Ok(desc.columns.keys().cloned().collect()),
    }
}

/// Execute a tenant-scoped read. Zero rows is a valid success.
pub fn execute_query(
    store: &Store,
    registry: &SchemaRegistry,
    tenant_id: &str,
    spec: &QuerySpec,
) -> Result<QueryOutput, QueryError> {
    let desc = registry
        .get(&spec.table)
        .ok_or_else(|| QueryError::UnknownTable(spec.table.clone()))?;

    let columns = resolve_projection(desc, spec.select_columns.as_deref())?;
    let where_clause = build_where(desc, tenant_id, &spec.filters, spec.date_range.as_ref())?;

    let order_sql = match &spec.order_by {
        Some(order) => {
            if !desc.has_column(&order.column) {
                return Err(QueryError::UnknownColumn {
                    table: desc.name.clone(),
                    column: order.column.clone(),
                });
            }
            format!(
                " ORDER BY \"{}\" {}",
                order.column,
                if order.ascending { "ASC" } else { "DESC" }
            )
        }
        None => match desc.date_column.as_deref() {
            Some(date_col) => format!(" ORDER BY \"{}\" DESC", date_col),
            None => String::new(),
        },
    };

    let limit = spec.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_ROWS);
    let projection = columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE {}{} LIMIT {}",
        projection, desc.name, where_clause.sql, order_sql, limit
    );
    tracing::debug!(table = %desc.name, %sql, "executing query");

    let data = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(where_clause.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_json(row, &columns)?);
        }
        Ok(out)
    })?;

    Ok(QueryOutput {
        table: desc.name.clone(),
        count: data.len(),
        data,
    })
}

/// Fetch the full filtered row set with no projection and no limit, for the
/// Aggregation Engine. Shares filter semantics with `execute_query` by
/// construction.
pub(crate) fn fetch_all_filtered(
    store: &Store,
    desc: &TableDescriptor,
    tenant_id: &str,
    filters: &[FilterClause],
    date_range: Option<&DateRange>,
) -> Result<Vec<JsonMap<String, JsonValue>>, QueryError> {
    let columns: Vec<String> = desc.columns.keys().cloned().collect();
    let where_clause = build_where(desc, tenant_id, filters, date_range)?;
    let projection = columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE {}",
        projection, desc.name, where_clause.sql
    );

    store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(where_clause.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_json(row, &columns)?);
        }
        Ok(out)
    })
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// In-memory store with two tenants' worth of payment rows.
    pub(crate) fn seeded_store(registry: &SchemaRegistry) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(registry).unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO payments (tenant_id, id, patient_id, amount, method, refunded, paid_at) VALUES
                     ('clinic_a', 1, 10, 50000.0, 'card', 0, '2026-01-05 10:30:00'),
                     ('clinic_a', 2, 11, 120000.0, 'cash', 0, '2026-01-20 14:00:00'),
                     ('clinic_a', 3, 10, 30000.0, 'card', 1, '2026-02-02 09:15:00'),
                     ('clinic_b', 4, 20, 999999.0, 'card', 0, '2026-01-10 11:00:00');
                     INSERT INTO expenses (tenant_id, id, category, vendor, amount, memo, spent_on) VALUES
                     ('clinic_a', 1, 'supplies', 'MediCo', 80000.0, NULL, '2026-01-03'),
                     ('clinic_a', 2, 'rent', 'Landlord', 2000000.0, NULL, '2026-01-01'),
                     ('clinic_b', 3, 'supplies', 'MediCo', 70000.0, NULL, '2026-01-03');",
                )?;
                Ok(())
            })
            .unwrap();
        store
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::seeded_store;
    use super::*;

    fn spec(table: &str) -> QuerySpec {
        QuerySpec {
            table: table.to_string(),
            select_columns: None,
            filters: Vec::new(),
            date_range: None,
            order_by: None,
            limit: None,
        }
    }

    #[test]
    fn test_tenant_isolation() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);

        let a = execute_query(&store, &registry, "clinic_a", &spec("payments")).unwrap();
        assert_eq!(a.count, 3);
        assert!(a.data.iter().all(|r| r["amount"].as_f64().unwrap() < 500000.0));

        let b = execute_query(&store, &registry, "clinic_b", &spec("payments")).unwrap();
        assert_eq!(b.count, 1);
        assert_eq!(b.data[0]["amount"].as_f64().unwrap(), 999999.0);

        // A filter cannot widen the tenant scope.
        let mut probing = spec("payments");
        probing.filters = vec![FilterClause {
            column: "amount".into(),
            operator: FilterOp::Gt,
            value: "0".into(),
        }];
        let a = execute_query(&store, &registry, "clinic_a", &probing).unwrap();
        assert!(a.data.iter().all(|r| r["amount"].as_f64().unwrap() != 999999.0));
    }

    #[test]
    fn test_unknown_table() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let err = execute_query(&store, &registry, "clinic_a", &spec("ghosts")).unwrap_err();
        assert!(matches!(err, QueryError::UnknownTable(_)));
    }

    #[test]
    fn test_unknown_column_in_filter() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let mut s = spec("payments");
        s.filters = vec![FilterClause {
            column: "no_such_col".into(),
            operator: FilterOp::Eq,
            value: "x".into(),
        }];
        let err = execute_query(&store, &registry, "clinic_a", &s).unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
    }

    #[test]
    fn test_limit_clamped_to_hard_cap() {
        let registry = SchemaRegistry::with_default_tables();
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(&registry).unwrap();
        store
            .with_conn(|conn| {
                for i in 0..500 {
                    conn.execute(
                        "INSERT INTO payments (tenant_id, id, patient_id, amount, method, refunded, paid_at)
                         VALUES ('clinic_a', ?1, 1, 1000.0, 'card', 0, '2026-01-01 10:00:00')",
                        [i],
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let mut s = spec("payments");
        s.limit = Some(10000);
        let out = execute_query(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(out.count, 100);
    }

    #[test]
    fn test_date_range_widens_timestamp_bounds() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let mut s = spec("payments");
        s.date_range = Some(DateRange {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
        });
        // Both the 10:30 payment on the start day and the 14:00 payment on the
        // end day are inside the widened bounds.
        let out = execute_query(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(out.count, 2);
    }

    #[test]
    fn test_date_range_on_plain_date_column() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let mut s = spec("expenses");
        s.date_range = Some(DateRange {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        });
        let out = execute_query(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(out.count, 1);
        assert_eq!(out.data[0]["category"], "supplies");
    }

    #[test]
    fn test_like_and_ilike() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);

        let mut s = spec("expenses");
        s.filters = vec![FilterClause {
            column: "vendor".into(),
            operator: FilterOp::Like,
            value: "medi".into(),
        }];
        // case_sensitive_like is on: lowercase 'medi' does not match 'MediCo'
        assert_eq!(execute_query(&store, &registry, "clinic_a", &s).unwrap().count, 0);

        s.filters[0].operator = FilterOp::Ilike;
        assert_eq!(execute_query(&store, &registry, "clinic_a", &s).unwrap().count, 1);
    }

    #[test]
    fn test_default_ordering_is_date_column_desc() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let out = execute_query(&store, &registry, "clinic_a", &spec("payments")).unwrap();
        let dates: Vec<&str> = out
            .data
            .iter()
            .map(|r| r["paid_at"].as_str().unwrap())
            .collect();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_projection_and_empty_result() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let mut s = spec("payments");
        s.select_columns = Some("amount, method".into());
        s.filters = vec![FilterClause {
            column: "method".into(),
            operator: FilterOp::Eq,
            value: "transfer".into(),
        }];
        let out = execute_query(&store, &registry, "clinic_a", &s).unwrap();
        // Zero rows is a success, not an error.
        assert_eq!(out.count, 0);
        assert!(out.data.is_empty());
    }

    #[test]
    fn test_spec_parses_wire_arguments() {
        let args = serde_json::json!({
            "table_name": "payments",
            "filters": [{"column": "amount", "operator": "gte", "value": 50000}],
            "date_range": {"start_date": "2026-01-01", "end_date": "2026-01-31"},
            "limit": 20
        });
        let spec: QuerySpec = serde_json::from_value(args).unwrap();
        assert_eq!(spec.table, "payments");
        assert_eq!(spec.filters[0].value, "50000");
        assert_eq!(spec.limit, Some(20));
    }
}
