//! SQLite connector integration tests.
//!
//! This test suite covers:
//! - Connectivity probes against a temp-file database
//! - Compact schema text and allowlist filtering
//! - Schema cache hits within the TTL and refresh after expiry
//! - Read-only execution, row caps, and value conversion
//!
//! Note: SQLite tests use temp files, so no testcontainers needed.

#![cfg(feature = "sqlite")]

use datagate_core::connectors::ConnectorContext;
use datagate_core::connectors::sqlite::SqliteFactory;
use datagate_core::{
    ConnectorClient, ConnectorFactory, DataGateError, DataSource, DataSourceType, QueryOptions,
    SchemaCache, SchemaRequest, Settings,
};
use serde_json::json;
use sqlx::ConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Helper function to create a database file with a small sales schema
async fn create_database(path: &Path) {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let mut conn = options.connect().await.unwrap();

    sqlx::raw_sql(
        r#"
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, vip BOOLEAN);
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id),
            amount REAL,
            placed_at DATETIME,
            receipt BLOB,
            note
        );
        CREATE VIEW big_orders AS SELECT * FROM orders WHERE amount > 100;
        INSERT INTO customers VALUES (1, 'Ada', 1), (2, 'Grace', 0);
        INSERT INTO orders VALUES
            (1, 1, 199.95, '2026-01-02 10:00:00', X'DEADBEEF', NULL),
            (2, 2, 10.5, '2026-01-03 11:30:00', NULL, 'gift'),
            (3, 1, 42.0, '2026-02-01 09:15:00', NULL, NULL);
        "#,
    )
    .execute(&mut conn)
    .await
    .unwrap();
}

struct Fixture {
    _dir: TempDir,
    source: DataSource,
    cache: Arc<SchemaCache>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    create_database(&path).await;

    Fixture {
        source: DataSource::new(DataSourceType::Sqlite).with_database(path.display().to_string()),
        _dir: dir,
        cache: Arc::new(SchemaCache::default()),
    }
}

async fn client_for(fixture: &Fixture, ttl: Duration) -> Box<dyn ConnectorClient> {
    let context = ConnectorContext::new(Settings::default().with_schema_cache_ttl(ttl))
        .with_cache(Arc::clone(&fixture.cache));
    SqliteFactory::new(context)
        .create_client(&fixture.source)
        .await
        .unwrap()
}

// =============================================================================
// Connectivity
// =============================================================================

#[tokio::test]
async fn test_sqlite_connection_probe() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let result = client.test_connection().await;
    assert!(result.ok, "probe failed: {:?}", result.error);
    assert!(result.error.is_none());
    client.disconnect().await;
}

// =============================================================================
// Schema
// =============================================================================

#[tokio::test]
async fn test_compact_schema_lines() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let schema = client
        .get_schema(&SchemaRequest::new(fixture.source.cache_key()))
        .await
        .unwrap();
    let lines: Vec<&str> = schema.lines().collect();

    assert!(lines.contains(&"customers.vip BOOLEAN"));
    assert!(lines.contains(&"orders.placed_at DATETIME"));
    assert!(lines.contains(&"orders.note ANY"));
    assert!(lines.iter().any(|l| l.starts_with("big_orders.")));
    assert!(lines.iter().all(|l| !l.starts_with("sqlite_")));
    client.disconnect().await;
}

#[tokio::test]
async fn test_schema_allowlist_filter_is_case_insensitive() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let request = SchemaRequest::new(fixture.source.cache_key())
        .with_allowed_tables(vec!["ORDERS".to_string()]);
    let schema = client.get_schema(&request).await.unwrap();

    assert!(!schema.is_empty());
    assert!(schema.lines().all(|l| l.starts_with("orders.")));
    client.disconnect().await;
}

#[tokio::test]
async fn test_schema_cache_respects_ttl() {
    let fixture = fixture().await;
    let ttl = Duration::from_millis(300);
    let key = fixture.source.cache_key();

    let client = client_for(&fixture, ttl).await;
    let first = client.get_schema(&SchemaRequest::new(&key)).await.unwrap();
    client.disconnect().await;

    // Change the catalog behind the cache
    let path = fixture.source.database.clone().unwrap();
    let mut conn = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
        .unwrap()
        .connect()
        .await
        .unwrap();
    sqlx::raw_sql("DROP VIEW big_orders")
        .execute(&mut conn)
        .await
        .unwrap();

    let client = client_for(&fixture, ttl).await;
    let cached = client.get_schema(&SchemaRequest::new(&key)).await.unwrap();
    assert_eq!(cached, first, "second read within TTL must come from cache");

    tokio::time::sleep(ttl + Duration::from_millis(200)).await;
    let refreshed = client.get_schema(&SchemaRequest::new(&key)).await.unwrap();
    assert!(!refreshed.contains("big_orders."));
    client.disconnect().await;
}

#[tokio::test]
async fn test_allowed_tables_intersection() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let all = client.get_allowed_tables(None).await.unwrap();
    assert_eq!(all, vec!["big_orders", "customers", "orders"]);

    let candidates = vec!["Customers".to_string(), "missing".to_string()];
    let some = client.get_allowed_tables(Some(&candidates)).await.unwrap();
    assert_eq!(some, vec!["customers"]);
    client.disconnect().await;
}

// =============================================================================
// Execution
// =============================================================================

#[tokio::test]
async fn test_query_values_and_fields() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let result = client
        .execute_query(
            "SELECT o.id, c.name, c.vip, o.amount, o.receipt, o.note \
             FROM orders o JOIN customers c ON c.id = o.customer_id ORDER BY o.id",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 3);
    let names: Vec<&str> = result.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "vip", "amount", "receipt", "note"]);

    let first = &result.rows[0];
    assert_eq!(first["id"], json!(1));
    assert_eq!(first["name"], json!("Ada"));
    assert_eq!(first["vip"], json!(true));
    assert_eq!(first["amount"], json!(199.95));
    assert_eq!(first["receipt"], json!("base64:3q2+7w=="));
    assert_eq!(first["note"], json!(null));
    assert_eq!(result.rows[1]["vip"], json!(false));
    client.disconnect().await;
}

#[tokio::test]
async fn test_limit_rows_caps_cursor() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let options = QueryOptions::new(Duration::from_secs(5)).with_limit_rows(2);
    let result = client
        .execute_query("SELECT id FROM orders ORDER BY id", &options)
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows.len(), 2);
    client.disconnect().await;
}

#[tokio::test]
async fn test_writes_fail_on_read_only_file() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let err = client
        .execute_query("DELETE FROM orders", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DataGateError::QueryExecution { .. }));

    // Connection stays usable after a failed statement
    let result = client
        .execute_query("SELECT COUNT(*) AS n FROM orders", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(3));
    client.disconnect().await;
}

#[tokio::test]
async fn test_runaway_query_times_out() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    let sql = "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 50000000) \
               SELECT COUNT(*) FROM n";
    let err = client
        .execute_query(sql, &QueryOptions::new(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err}");

    // The interrupted transaction rolled back; the connection is still usable
    let result = client
        .execute_query("SELECT 1 AS one", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.rows[0]["one"], json!(1));
    client.disconnect().await;
}

#[tokio::test]
async fn test_unbounded_recursion_is_interrupted() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;
    let timeout = Duration::from_millis(150);
    let sql = "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) \
               SELECT count(*) FROM r";

    for _ in 0..3 {
        let started = std::time::Instant::now();
        let err = client
            .execute_query(sql, &QueryOptions::new(timeout))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");
        // Interrupted by SQLite itself, well before the client-side backstop
        assert!(
            started.elapsed() < Duration::from_millis(550),
            "statement ran for {:?}",
            started.elapsed()
        );
    }

    // The deadline is cleared after each call; a normal query still runs
    let result = client
        .execute_query("SELECT COUNT(*) AS n FROM orders", &QueryOptions::new(timeout))
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], json!(3));
    client.disconnect().await;
}

#[tokio::test]
async fn test_use_after_disconnect() {
    let fixture = fixture().await;
    let client = client_for(&fixture, Duration::from_secs(60)).await;

    client.disconnect().await;
    client.disconnect().await;

    let err = client.get_allowed_tables(None).await.unwrap_err();
    assert!(matches!(err, DataGateError::Connection { .. }));
}
