//! SQLite catalog reads.

use crate::connectors::helpers::{catalog_field, single_token_type};
use crate::error::DataGateError;
use crate::Result;
use sqlx::sqlite::SqliteConnection;

const LIST_TABLES: &str = "SELECT name FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
     ORDER BY name";

const TABLE_COLUMNS: &str = "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid";

/// User tables and views, by name.
///
/// # Errors
/// Returns error if `sqlite_master` cannot be read
pub async fn list_tables(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(LIST_TABLES)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DataGateError::query_error("Failed to list SQLite tables", e))
}

/// Compact schema text: `table.column TYPE` per column, in table then
/// column order.
///
/// # Errors
/// Returns error if the catalog cannot be read
pub async fn describe_schema(conn: &mut SqliteConnection) -> Result<String> {
    let tables = list_tables(conn).await?;
    let mut lines = Vec::new();

    for table in &tables {
        let columns = sqlx::query(TABLE_COLUMNS)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                DataGateError::query_error(format!("Failed to read columns of {}", table), e)
            })?;

        for column in &columns {
            let name: String = catalog_field(column, "name")?;
            let declared: Option<String> = catalog_field(column, "type")?;
            lines.push(format!(
                "{}.{} {}",
                table,
                name,
                single_token_type(declared.as_deref().unwrap_or_default())
            ));
        }
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::ConnectOptions;
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    async fn memory_connection() -> SqliteConnection {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_catalog_column_is_an_error() {
        let mut conn = memory_connection().await;
        let row = sqlx::query("SELECT 'orders' AS title")
            .fetch_one(&mut conn)
            .await
            .unwrap();

        let err = catalog_field::<_, String>(&row, "name").unwrap_err();
        assert!(matches!(err, DataGateError::QueryExecution { .. }));
        assert!(err.to_string().contains("name"), "got {err}");

        let title: String = catalog_field(&row, "title").unwrap();
        assert_eq!(title, "orders");
    }

    #[tokio::test]
    async fn test_describe_schema_reads_declared_types() {
        let mut conn = memory_connection().await;
        sqlx::raw_sql("CREATE TABLE regions (id INTEGER, label DOUBLE PRECISION, extra)")
            .execute(&mut conn)
            .await
            .unwrap();

        let schema = describe_schema(&mut conn).await.unwrap();
        assert_eq!(
            schema,
            "regions.id INTEGER\nregions.label DOUBLE_PRECISION\nregions.extra ANY"
        );
    }
}
