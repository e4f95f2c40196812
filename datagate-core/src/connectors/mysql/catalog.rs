//! MySQL catalog reads, scoped to the connection's current database.

use crate::connectors::helpers::{catalog_field, single_token_type};
use crate::error::DataGateError;
use crate::Result;
use sqlx::mysql::MySqlConnection;

// Cast to CHAR to avoid VARBINARY type issues in MySQL 8.0+
const SCHEMA_COLUMNS: &str = r#"
    SELECT
        CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(DATA_TYPE AS CHAR) AS data_type
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME, ORDINAL_POSITION
"#;

const VISIBLE_TABLES: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) AS table_name
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
        AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
    ORDER BY TABLE_NAME
"#;

/// Compact schema text, one `table.column data_type` line per column.
///
/// # Errors
/// Returns a query error if the catalog cannot be read
pub async fn describe_schema(conn: &mut MySqlConnection) -> Result<String> {
    let rows = sqlx::query(SCHEMA_COLUMNS)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DataGateError::query_error("Failed to read MySQL catalog", e))?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in &rows {
        let table: String = catalog_field(row, "table_name")?;
        let column: String = catalog_field(row, "column_name")?;
        let data_type: Option<String> = catalog_field(row, "data_type")?;
        lines.push(format!(
            "{}.{} {}",
            table,
            column,
            single_token_type(data_type.as_deref().unwrap_or_default())
        ));
    }

    Ok(lines.join("\n"))
}

/// Lists base tables and views of the current database.
///
/// # Errors
/// Returns a query error if the catalog cannot be read
pub async fn list_tables(conn: &mut MySqlConnection) -> Result<Vec<String>> {
    let rows = sqlx::query(VISIBLE_TABLES)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DataGateError::query_error("Failed to list MySQL tables", e))?;

    rows.iter()
        .map(|row| catalog_field::<_, String>(row, "table_name"))
        .collect()
}
