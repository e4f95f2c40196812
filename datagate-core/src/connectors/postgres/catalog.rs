//! PostgreSQL catalog reads from `information_schema`.

use crate::connectors::helpers::catalog_field;
use crate::error::DataGateError;
use crate::Result;
use sqlx::postgres::PgConnection;

/// Columns of every user table and view, in schema, table, ordinal order.
///
/// Identifiers are cast to `text` so the `name` domain decodes as `String`.
const SCHEMA_COLUMNS: &str = r#"
    SELECT
        c.table_schema::text AS table_schema,
        c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.udt_name::text AS udt_name
    FROM information_schema.columns c
    JOIN information_schema.tables t
        ON t.table_schema = c.table_schema
        AND t.table_name = c.table_name
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
        AND c.table_schema NOT LIKE 'pg_toast%'
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

const VISIBLE_TABLES: &str = r#"
    SELECT table_schema::text || '.' || table_name::text AS qualified_name
    FROM information_schema.tables
    WHERE table_type IN ('BASE TABLE', 'VIEW')
        AND table_schema NOT IN ('pg_catalog', 'information_schema')
        AND table_schema NOT LIKE 'pg_toast%'
    ORDER BY 1
"#;

/// Compact schema text, one `schema.table.column udt_name` line per column.
///
/// # Errors
/// Returns a query error if the catalog cannot be read
pub async fn describe_schema(conn: &mut PgConnection) -> Result<String> {
    let rows = sqlx::query(SCHEMA_COLUMNS)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DataGateError::query_error("Failed to read PostgreSQL catalog", e))?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in &rows {
        let schema: String = catalog_field(row, "table_schema")?;
        let table: String = catalog_field(row, "table_name")?;
        let column: String = catalog_field(row, "column_name")?;
        let udt: Option<String> = catalog_field(row, "udt_name")?;
        lines.push(format_line(&schema, &table, &column, udt.as_deref()));
    }

    Ok(lines.join("\n"))
}

/// Lists schema-qualified base tables and views.
///
/// # Errors
/// Returns a query error if the catalog cannot be read
pub async fn list_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(VISIBLE_TABLES)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DataGateError::query_error("Failed to list PostgreSQL tables", e))
}

fn format_line(schema: &str, table: &str, column: &str, udt: Option<&str>) -> String {
    format!(
        "{}.{}.{} {}",
        schema,
        table,
        column,
        crate::connectors::helpers::single_token_type(udt.unwrap_or_default())
    )
}
