//! Parser for compact schema text.
//!
//! Connectors describe a schema as one `<table>.<column> <type>` line per
//! column, where the table may itself be `schema.table`. Types are always a
//! single token, so the last space on a line separates path from type.

use serde::{Deserialize, Serialize};

/// Type names classified as numeric (compared case-insensitively).
const NUMERIC_TYPES: &[&str] = &[
    "int", "int2", "int4", "int8", "integer", "smallint", "bigint", "tinyint", "mediumint",
    "serial", "bigserial", "smallserial", "decimal", "numeric", "real", "float", "float4",
    "float8", "double", "double_precision", "money",
];

/// Type names classified as temporal (compared case-insensitively).
const TEMPORAL_TYPES: &[&str] = &[
    "date", "time", "timetz", "timestamp", "timestamptz", "datetime", "year", "interval",
];

/// Column of a parsed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_numeric: bool,
    pub is_temporal: bool,
}

/// Table with its columns in line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Columns usable as measures.
    pub fn numeric_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_numeric)
    }

    /// Columns usable as time axes.
    pub fn temporal_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_temporal)
    }
}

/// True when `data_type` is one of the numeric type names.
pub fn is_numeric_type(data_type: &str) -> bool {
    NUMERIC_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(data_type))
}

/// True when `data_type` is one of the temporal type names.
pub fn is_temporal_type(data_type: &str) -> bool {
    TEMPORAL_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(data_type))
}

/// Parses compact schema text into tables.
///
/// Tables keep their order of first appearance. Blank lines and lines
/// without a type or without a `table.column` path are skipped.
///
/// # Example
/// ```rust
/// use datagate_core::parse_schema;
///
/// let tables = parse_schema("public.orders.id int4\npublic.orders.placed_at timestamptz");
/// assert_eq!(tables.len(), 1);
/// assert_eq!(tables[0].name, "public.orders");
/// assert!(tables[0].columns[0].is_numeric);
/// assert!(tables[0].columns[1].is_temporal);
/// ```
pub fn parse_schema(text: &str) -> Vec<TableInfo> {
    let mut tables: Vec<TableInfo> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        let Some((path, data_type)) = line.rsplit_once(' ') else {
            continue;
        };
        let (path, data_type) = (path.trim_end(), data_type.trim());
        let Some((table, column)) = path.rsplit_once('.') else {
            continue;
        };
        if table.is_empty() || column.is_empty() || data_type.is_empty() {
            continue;
        }

        let column = ColumnInfo {
            name: column.to_string(),
            data_type: data_type.to_string(),
            is_numeric: is_numeric_type(data_type),
            is_temporal: is_temporal_type(data_type),
        };

        match tables.iter_mut().find(|t| t.name == table) {
            Some(existing) => existing.columns.push(column),
            None => tables.push(TableInfo {
                name: table.to_string(),
                columns: vec![column],
            }),
        }
    }

    tables
}
