//! Aggregation Engine - in-process grouped reductions
//!
//! Retrieves the same tenant-scoped, filtered row set the Query Builder would
//! return (full rows, no limit), then computes reductions in memory. Keeping
//! the grouping client-side gives uniform behavior across heterogeneous
//! tables without per-table SQL.
//!
//! Coercion contract: non-numeric and missing values count as 0 for
//! sum/avg/min/max, and `avg` divides by partition size rather than by the
//! number of non-null values for the column.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::query::{fetch_all_filtered, DateRange, FilterClause};
use super::Store;
use crate::error::QueryError;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggFunc {
    fn key_prefix(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Count => "count",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub function: AggFunc,
    #[serde(default)]
    pub alias: Option<String>,
}

impl Aggregation {
    fn result_key(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.function.key_prefix(), self.column))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSpec {
    #[serde(rename = "table_name", alias = "table")]
    pub table: String,
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Serialize)]
pub struct AggregationOutput {
    pub table: String,
    pub total_rows: usize,
    pub aggregations: Vec<JsonMap<String, JsonValue>>,
}

/// Coerce a row value to a number: non-numeric and missing both become 0.
fn coerce_numeric(value: Option<&JsonValue>) -> f64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn reduce(agg: &Aggregation, rows: &[&JsonMap<String, JsonValue>]) -> JsonValue {
    match agg.function {
        AggFunc::Count => json!(rows.len()),
        AggFunc::Sum => {
            let sum: f64 = rows.iter().map(|r| coerce_numeric(r.get(&agg.column))).sum();
            json!(sum)
        }
        AggFunc::Avg => {
            let sum: f64 = rows.iter().map(|r| coerce_numeric(r.get(&agg.column))).sum();
            // Divides by partition size, not by the count of present values.
            json!(sum / rows.len() as f64)
        }
        AggFunc::Min => {
            let min = rows
                .iter()
                .map(|r| coerce_numeric(r.get(&agg.column)))
                .fold(f64::INFINITY, f64::min);
            json!(min)
        }
        AggFunc::Max => {
            let max = rows
                .iter()
                .map(|r| coerce_numeric(r.get(&agg.column)))
                .fold(f64::NEG_INFINITY, f64::max);
            json!(max)
        }
    }
}

/// Identity results for an empty filtered set: `count` → 0, everything else
/// → null, so callers can render "no data in range" instead of failing.
fn identity_row(aggregations: &[Aggregation]) -> JsonMap<String, JsonValue> {
    let mut row = JsonMap::new();
    for agg in aggregations {
        let value = match agg.function {
            AggFunc::Count => json!(0),
            _ => JsonValue::Null,
        };
        row.insert(agg.result_key(), value);
    }
    row
}

pub fn execute_aggregation(
    store: &Store,
    registry: &SchemaRegistry,
    tenant_id: &str,
    spec: &AggregationSpec,
) -> Result<AggregationOutput, QueryError> {
    let desc = registry
        .get(&spec.table)
        .ok_or_else(|| QueryError::UnknownTable(spec.table.clone()))?;

    if spec.aggregations.is_empty() {
        return Err(QueryError::MalformedArguments(
            "aggregations must not be empty".into(),
        ));
    }
    for agg in &spec.aggregations {
        // `count` counts rows regardless of the column, so `*` is accepted.
        let counts_rows = agg.function == AggFunc::Count && agg.column == "*";
        if !counts_rows && !desc.has_column(&agg.column) {
            return Err(QueryError::UnknownColumn {
                table: desc.name.clone(),
                column: agg.column.clone(),
            });
        }
    }
    for col in &spec.group_by {
        if !desc.has_column(col) {
            return Err(QueryError::UnknownColumn {
                table: desc.name.clone(),
                column: col.clone(),
            });
        }
    }

    let rows = fetch_all_filtered(store, desc, tenant_id, &spec.filters, spec.date_range.as_ref())?;
    tracing::debug!(table = %desc.name, rows = rows.len(), groups = spec.group_by.len(), "aggregating");

    if rows.is_empty() {
        return Ok(AggregationOutput {
            table: desc.name.clone(),
            total_rows: 0,
            aggregations: vec![identity_row(&spec.aggregations)],
        });
    }

    let result_rows: Vec<JsonMap<String, JsonValue>> = if spec.group_by.is_empty() {
        let all: Vec<&JsonMap<String, JsonValue>> = rows.iter().collect();
        let mut row = JsonMap::new();
        for agg in &spec.aggregations {
            row.insert(agg.result_key(), reduce(agg, &all));
        }
        vec![row]
    } else {
        // Partition by the tuple of group_by values; key equality is on the
        // JSON values themselves, not numeric binning.
        let mut partitions: BTreeMap<Vec<String>, Vec<&JsonMap<String, JsonValue>>> =
            BTreeMap::new();
        for row in &rows {
            let key: Vec<String> = spec
                .group_by
                .iter()
                .map(|col| row.get(col).cloned().unwrap_or(JsonValue::Null).to_string())
                .collect();
            partitions.entry(key).or_default().push(row);
        }

        partitions
            .values()
            .map(|partition| {
                let mut row = JsonMap::new();
                for col in &spec.group_by {
                    let value = partition[0].get(col).cloned().unwrap_or(JsonValue::Null);
                    row.insert(col.clone(), value);
                }
                for agg in &spec.aggregations {
                    row.insert(agg.result_key(), reduce(agg, partition));
                }
                row
            })
            .collect()
    };

    Ok(AggregationOutput {
        table: desc.name.clone(),
        total_rows: rows.len(),
        aggregations: result_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::super::query::test_fixtures::seeded_store;
    use super::*;
    use crate::store::FilterOp;

    fn agg(column: &str, function: AggFunc) -> Aggregation {
        Aggregation {
            column: column.to_string(),
            function,
            alias: None,
        }
    }

    fn spec(table: &str, aggregations: Vec<Aggregation>) -> AggregationSpec {
        AggregationSpec {
            table: table.to_string(),
            aggregations,
            group_by: Vec::new(),
            filters: Vec::new(),
            date_range: None,
        }
    }

    #[test]
    fn test_global_sum_and_count() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let out = execute_aggregation(
            &store,
            &registry,
            "clinic_a",
            &spec("payments", vec![agg("amount", AggFunc::Sum), agg("*", AggFunc::Count)]),
        )
        .unwrap();
        assert_eq!(out.total_rows, 3);
        assert_eq!(out.aggregations.len(), 1);
        assert_eq!(out.aggregations[0]["sum_amount"].as_f64().unwrap(), 200000.0);
        assert_eq!(out.aggregations[0]["count_*"].as_u64().unwrap(), 3);
    }

    #[test]
    fn test_tenant_isolation_in_aggregation() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let out = execute_aggregation(
            &store,
            &registry,
            "clinic_b",
            &spec("payments", vec![agg("amount", AggFunc::Sum)]),
        )
        .unwrap();
        assert_eq!(out.total_rows, 1);
        assert_eq!(out.aggregations[0]["sum_amount"].as_f64().unwrap(), 999999.0);
    }

    #[test]
    fn test_empty_result_returns_identities() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let mut s = spec(
            "payments",
            vec![agg("amount", AggFunc::Sum), agg("*", AggFunc::Count)],
        );
        s.filters = vec![FilterClause {
            column: "method".into(),
            operator: FilterOp::Eq,
            value: "gold_bars".into(),
        }];
        let out = execute_aggregation(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(out.total_rows, 0);
        assert_eq!(out.aggregations.len(), 1);
        assert!(out.aggregations[0]["sum_amount"].is_null());
        assert_eq!(out.aggregations[0]["count_*"].as_u64().unwrap(), 0);
    }

    #[test]
    fn test_numeric_coercion_treats_non_numeric_as_zero() {
        let registry = SchemaRegistry::with_default_tables();
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(&registry).unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO payments (tenant_id, id, patient_id, amount, method, refunded, paid_at) VALUES
                     ('clinic_a', 1, 1, 5, 'card', 0, '2026-01-01 10:00:00'),
                     ('clinic_a', 2, 1, 'bad', 'card', 0, '2026-01-02 10:00:00'),
                     ('clinic_a', 3, 1, 3, 'card', 0, '2026-01-03 10:00:00');",
                )?;
                Ok(())
            })
            .unwrap();

        let s = spec("payments", vec![agg("amount", AggFunc::Sum)]);
        let first = execute_aggregation(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(first.aggregations[0]["sum_amount"].as_f64().unwrap(), 8.0);
        // Repeating the same aggregation yields identical results.
        let second = execute_aggregation(&store, &registry, "clinic_a", &s).unwrap();
        assert_eq!(
            first.aggregations[0]["sum_amount"],
            second.aggregations[0]["sum_amount"]
        );
    }

    #[test]
    fn test_avg_divides_by_partition_size() {
        let registry = SchemaRegistry::with_default_tables();
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(&registry).unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO payments (tenant_id, id, patient_id, amount, method, refunded, paid_at) VALUES
                     ('clinic_a', 1, 1, 10, 'card', 0, '2026-01-01 10:00:00'),
                     ('clinic_a', 2, 1, NULL, 'card', 0, '2026-01-02 10:00:00');",
                )?;
                Ok(())
            })
            .unwrap();
        let out = execute_aggregation(
            &store,
            &registry,
            "clinic_a",
            &spec("payments", vec![agg("amount", AggFunc::Avg)]),
        )
        .unwrap();
        // (10 + 0) / 2, not 10 / 1.
        assert_eq!(out.aggregations[0]["avg_amount"].as_f64().unwrap(), 5.0);
    }

    #[test]
    fn test_grouped_sums_partition_the_global_sum() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);

        let global = execute_aggregation(
            &store,
            &registry,
            "clinic_a",
            &spec("payments", vec![agg("amount", AggFunc::Sum)]),
        )
        .unwrap();
        let global_sum = global.aggregations[0]["sum_amount"].as_f64().unwrap();

        let mut grouped_spec = spec("payments", vec![agg("amount", AggFunc::Sum)]);
        grouped_spec.group_by = vec!["method".into()];
        let grouped = execute_aggregation(&store, &registry, "clinic_a", &grouped_spec).unwrap();
        let grouped_sum: f64 = grouped
            .aggregations
            .iter()
            .map(|r| r["sum_amount"].as_f64().unwrap())
            .sum();
        assert_eq!(global_sum, grouped_sum);
        assert_eq!(grouped.aggregations.len(), 2); // card, cash
    }

    #[test]
    fn test_alias_and_min_max() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let out = execute_aggregation(
            &store,
            &registry,
            "clinic_a",
            &spec(
                "payments",
                vec![
                    Aggregation {
                        column: "amount".into(),
                        function: AggFunc::Max,
                        alias: Some("biggest".into()),
                    },
                    agg("amount", AggFunc::Min),
                ],
            ),
        )
        .unwrap();
        assert_eq!(out.aggregations[0]["biggest"].as_f64().unwrap(), 120000.0);
        assert_eq!(out.aggregations[0]["min_amount"].as_f64().unwrap(), 30000.0);
    }

    #[test]
    fn test_empty_aggregations_rejected() {
        let registry = SchemaRegistry::with_default_tables();
        let store = seeded_store(&registry);
        let err =
            execute_aggregation(&store, &registry, "clinic_a", &spec("payments", vec![]))
                .unwrap_err();
        assert!(matches!(err, QueryError::MalformedArguments(_)));
    }
}
