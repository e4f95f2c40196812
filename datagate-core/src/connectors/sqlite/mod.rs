//! SQLite connector.
//!
//! # Module Structure
//! - `catalog`: table listing and compact schema via `sqlite_master`
//!   and `pragma_table_info`
//! - `execution`: read-only transactional execution and row conversion
//!
//! # SQLite-Specific Behavior
//! - Database files are opened read-only; a missing file is an error
//! - There is no server-side statement timeout; a progress handler
//!   interrupts a statement once its timeout has elapsed, and the
//!   transaction rolls back. A client-side deadline with grace backs it up,
//!   and a connection that overran that is discarded
//! - The same client drives uploaded spreadsheets through a different
//!   [`SqliteOpener`]

pub mod catalog;
pub mod execution;

use super::helpers::{self, CLIENT_DEADLINE_GRACE, ConnectionSlot, connect_with_deadline};
use super::{ConnectorClient, ConnectorContext, ConnectorFactory};
use crate::error::{DataGateError, redact_database_url};
use crate::models::{
    ConnectionTestResult, DataSource, DataSourceType, Dialect, QueryOptions, QueryResult,
    SchemaRequest,
};
use crate::tables::intersect_tables;
use crate::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use std::str::FromStr;
use tracing::debug;

/// Opens the connection a [`SqliteClient`] works on.
#[async_trait]
pub trait SqliteOpener: Send + Sync {
    /// Opens a fresh connection, ready to query.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or prepared
    async fn open(&self, context: &ConnectorContext) -> Result<SqliteConnection>;
}

/// Opens a SQLite database file read-only.
pub struct FileOpener {
    data_source: DataSource,
}

impl FileOpener {
    pub fn new(data_source: DataSource) -> Self {
        Self { data_source }
    }
}

#[async_trait]
impl SqliteOpener for FileOpener {
    async fn open(&self, context: &ConnectorContext) -> Result<SqliteConnection> {
        let url = context.connection_url(&self.data_source)?;
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|_| {
                DataGateError::configuration(format!(
                    "Invalid SQLite connection string: {}",
                    redact_database_url(&url)
                ))
            })?
            .read_only(true);

        debug!(source = %self.data_source.id, "Opening SQLite database");
        connect_with_deadline(context.settings.connect_timeout, options.connect()).await
    }
}

/// Client over a single SQLite connection.
pub struct SqliteClient<O = FileOpener> {
    opener: O,
    context: ConnectorContext,
    slot: ConnectionSlot<SqliteConnection>,
}

impl<O> std::fmt::Debug for SqliteClient<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteClient").finish_non_exhaustive()
    }
}

impl<O: SqliteOpener> SqliteClient<O> {
    pub fn new(opener: O, context: ConnectorContext) -> Self {
        Self {
            opener,
            context,
            slot: ConnectionSlot::new(),
        }
    }

    async fn connection(
        &self,
    ) -> Result<tokio::sync::MappedMutexGuard<'_, SqliteConnection>> {
        self.slot.acquire(|| self.opener.open(&self.context)).await
    }
}

#[async_trait]
impl<O: SqliteOpener> ConnectorClient for SqliteClient<O> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        helpers::probe(async {
            let mut conn = self.connection().await?;
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&mut *conn)
                .await
                .map_err(DataGateError::connection_failed)?;
            Ok(())
        })
        .await
    }

    async fn get_schema(&self, request: &SchemaRequest) -> Result<String> {
        helpers::cached_schema(
            &self.context.cache,
            self.context.settings.schema_cache_ttl,
            request,
            None,
            || async {
                let mut conn = self.connection().await?;
                catalog::describe_schema(&mut conn).await
            },
        )
        .await
    }

    async fn get_allowed_tables(&self, candidates: Option<&[String]>) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let tables = catalog::list_tables(&mut conn).await?;
        Ok(intersect_tables(tables, candidates, None))
    }

    async fn execute_query(&self, sql: &str, options: &QueryOptions) -> Result<QueryResult> {
        let mut conn = self.connection().await?;
        execution::set_deadline(&mut conn, options.timeout).await?;
        let backstop = options.timeout.saturating_add(CLIENT_DEADLINE_GRACE);
        let outcome =
            tokio::time::timeout(backstop, execution::execute(&mut conn, sql, options)).await;

        match outcome {
            Ok(result) => {
                execution::clear_deadline(&mut conn).await;
                result
            }
            Err(_) => {
                drop(conn);
                self.slot.discard().await;
                Err(DataGateError::timeout(options.timeout))
            }
        }
    }

    async fn disconnect(&self) {
        self.slot.close().await;
    }
}

/// Factory for SQLite file sources.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    context: ConnectorContext,
}

impl SqliteFactory {
    pub fn new(context: ConnectorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ConnectorFactory for SqliteFactory {
    fn type_tag(&self) -> &str {
        DataSourceType::Sqlite.tag()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn super::ConnectorClient>> {
        if data_source.source_type != DataSourceType::Sqlite {
            return Err(DataGateError::configuration(format!(
                "SQLite connector cannot serve a {} data source",
                data_source.source_type
            )));
        }
        Ok(Box::new(SqliteClient::new(
            FileOpener::new(data_source.clone()),
            self.context.clone(),
        )))
    }
}
