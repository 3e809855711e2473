//! Schema Registry - static catalog of queryable tables
//!
//! Pure metadata with no I/O and no tenant concept. Built once at startup and
//! read-only afterwards, so concurrent requests share it without locking.
//! Unknown-table lookups are explicit `Option` values; `describe` never
//! panics, because the model routinely probes names that do not exist.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

/// Type hint for a column. `Date` and `Timestamp` drive date-range widening;
/// the numeric hints drive filter-value coercion in the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    Timestamp,
}

/// Immutable descriptor for one queryable table.
#[derive(Debug, Clone, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub description: String,
    /// Column name → type hint. BTreeMap keeps describe payloads and default
    /// projections deterministic.
    pub columns: BTreeMap<String, ColumnType>,
    /// Column that date-range filters apply to, if any.
    pub date_column: Option<String>,
    /// Advisory hint strings naming related tables. Never executed.
    pub joins: Vec<String>,
}

impl TableDescriptor {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    /// Whether the date column is timestamp-typed (bounds must widen to
    /// full-day coverage).
    pub fn date_column_is_timestamp(&self) -> bool {
        self.date_column
            .as_deref()
            .and_then(|c| self.column_type(c))
            .map(|t| t == ColumnType::Timestamp)
            .unwrap_or(false)
    }
}

/// The full set of registered tables.
pub struct SchemaRegistry {
    tables: HashMap<String, TableDescriptor>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// The built-in clinic catalog.
    pub fn with_default_tables() -> Self {
        Self::new(default_tables())
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schema lookup exposed to the model.
    ///
    /// With a known table name, returns the full descriptor. With an unknown
    /// name, returns a JSON error object (the model probes freely). With no
    /// name, returns a condensed listing with type hints omitted to keep the
    /// payload small.
    pub fn describe(&self, table_name: Option<&str>) -> JsonValue {
        match table_name {
            Some(name) => match self.get(name) {
                Some(desc) => json!({
                    "table": desc.name,
                    "description": desc.description,
                    "columns": desc.columns,
                    "dateColumn": desc.date_column,
                    "joins": desc.joins,
                }),
                None => json!({
                    "error": format!("unknown table: {}", name),
                    "tables": self.table_names(),
                }),
            },
            None => {
                let tables: Vec<JsonValue> = self
                    .table_names()
                    .iter()
                    .filter_map(|n| self.get(n))
                    .map(|desc| {
                        json!({
                            "table": desc.name,
                            "description": desc.description,
                            "columns": desc.columns.keys().collect::<Vec<_>>(),
                            "dateColumn": desc.date_column,
                        })
                    })
                    .collect();
                json!({ "tables": tables })
            }
        }
    }
}

fn table(
    name: &str,
    description: &str,
    columns: &[(&str, ColumnType)],
    date_column: Option<&str>,
    joins: &[&str],
) -> TableDescriptor {
    TableDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        columns: columns
            .iter()
            .map(|(c, t)| (c.to_string(), *t))
            .collect(),
        date_column: date_column.map(|c| c.to_string()),
        joins: joins.iter().map(|j| j.to_string()).collect(),
    }
}

fn default_tables() -> Vec<TableDescriptor> {
    use ColumnType::*;
    vec![
        table(
            "patients",
            "등록 환자 명단 (registered patients: demographics, referral source, first visit)",
            &[
                ("id", Integer),
                ("name", Text),
                ("birth_date", Date),
                ("gender", Text),
                ("phone", Text),
                ("referral_source", Text),
                ("first_visit_at", Timestamp),
            ],
            Some("first_visit_at"),
            &["appointments", "payments", "memberships"],
        ),
        table(
            "appointments",
            "예약 및 방문 기록 (appointments: schedule, status, treatment type)",
            &[
                ("id", Integer),
                ("patient_id", Integer),
                ("staff_id", Integer),
                ("scheduled_at", Timestamp),
                ("status", Text),
                ("treatment_type", Text),
                ("memo", Text),
            ],
            Some("scheduled_at"),
            &["patients", "staff"],
        ),
        table(
            "payments",
            "수납 내역 (payments: amount, method, refund flag)",
            &[
                ("id", Integer),
                ("patient_id", Integer),
                ("amount", Real),
                ("method", Text),
                ("refunded", Boolean),
                ("paid_at", Timestamp),
            ],
            Some("paid_at"),
            &["patients"],
        ),
        table(
            "treatments",
            "시술/진료 항목 (treatment catalog: category, price, duration)",
            &[
                ("id", Integer),
                ("name", Text),
                ("category", Text),
                ("price", Real),
                ("duration_minutes", Integer),
                ("active", Boolean),
            ],
            None,
            &["appointments"],
        ),
        table(
            "inventory",
            "재고 현황 (inventory: stock levels, unit cost, last restock)",
            &[
                ("id", Integer),
                ("item_name", Text),
                ("category", Text),
                ("quantity", Integer),
                ("unit_cost", Real),
                ("restocked_on", Date),
            ],
            Some("restocked_on"),
            &[],
        ),
        table(
            "staff",
            "직원 명단 (staff: role, hire date, active flag)",
            &[
                ("id", Integer),
                ("name", Text),
                ("role", Text),
                ("hired_on", Date),
                ("active", Boolean),
            ],
            Some("hired_on"),
            &["appointments"],
        ),
        table(
            "expenses",
            "지출 내역 (expenses: category, vendor, amount)",
            &[
                ("id", Integer),
                ("category", Text),
                ("vendor", Text),
                ("amount", Real),
                ("memo", Text),
                ("spent_on", Date),
            ],
            Some("spent_on"),
            &[],
        ),
        table(
            "reviews",
            "고객 리뷰 (reviews: rating, channel, content)",
            &[
                ("id", Integer),
                ("patient_id", Integer),
                ("rating", Integer),
                ("channel", Text),
                ("content", Text),
                ("written_at", Timestamp),
            ],
            Some("written_at"),
            &["patients"],
        ),
        table(
            "messages",
            "환자 메시지 발송/수신 기록 (messages: channel, direction, body)",
            &[
                ("id", Integer),
                ("patient_id", Integer),
                ("channel", Text),
                ("direction", Text),
                ("body", Text),
                ("sent_at", Timestamp),
            ],
            Some("sent_at"),
            &["patients"],
        ),
        table(
            "memberships",
            "멤버십/패키지 가입 현황 (memberships: plan, start and expiry dates, price)",
            &[
                ("id", Integer),
                ("patient_id", Integer),
                ("plan", Text),
                ("price", Real),
                ("started_on", Date),
                ("expires_on", Date),
            ],
            Some("started_on"),
            &["patients", "payments"],
        ),
        table(
            "leads",
            "상담 문의 리드 (leads: source, status, registration time)",
            &[
                ("id", Integer),
                ("name", Text),
                ("phone", Text),
                ("source", Text),
                ("status", Text),
                ("registered_at", Timestamp),
            ],
            Some("registered_at"),
            &["patients"],
        ),
        table(
            "daily_stats",
            "일별 집계 (daily stats: visit counts, new patients, revenue)",
            &[
                ("id", Integer),
                ("stat_date", Date),
                ("visit_count", Integer),
                ("new_patient_count", Integer),
                ("revenue", Real),
            ],
            Some("stat_date"),
            &[],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_lookup() {
        let registry = SchemaRegistry::with_default_tables();
        assert!(registry.get("payments").is_some());
        assert!(registry.get("nonexistent_table").is_none());
        assert_eq!(registry.table_names().len(), 12);
    }

    #[test]
    fn test_describe_full_descriptor() {
        let registry = SchemaRegistry::with_default_tables();
        let desc = registry.describe(Some("payments"));
        assert_eq!(desc["table"], "payments");
        assert_eq!(desc["dateColumn"], "paid_at");
        assert_eq!(desc["columns"]["amount"], "real");
    }

    #[test]
    fn test_describe_unknown_table_is_error_not_panic() {
        let registry = SchemaRegistry::with_default_tables();
        let desc = registry.describe(Some("ghosts"));
        assert!(desc["error"].as_str().unwrap().contains("ghosts"));
        assert!(desc["tables"].is_array());
    }

    #[test]
    fn test_describe_condensed_omits_type_hints() {
        let registry = SchemaRegistry::with_default_tables();
        let listing = registry.describe(None);
        let tables = listing["tables"].as_array().unwrap();
        assert_eq!(tables.len(), 12);
        let first = &tables[0];
        assert!(first["columns"].is_array());
        assert!(first["columns"][0].is_string());
    }

    #[test]
    fn test_timestamp_detection() {
        let registry = SchemaRegistry::with_default_tables();
        assert!(registry.get("payments").unwrap().date_column_is_timestamp());
        assert!(!registry.get("expenses").unwrap().date_column_is_timestamp());
        assert!(!registry.get("treatments").unwrap().date_column_is_timestamp());
    }
}
