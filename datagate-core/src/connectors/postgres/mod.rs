//! PostgreSQL connector.
//!
//! # Module Structure
//! - `catalog`: compact schema and table listing from `information_schema`
//! - `execution`: read-only transactional execution with `row_to_json`
//!
//! # Session Safety
//! - Every connection is opened with `default_transaction_read_only = on`
//! - Every statement runs in an explicit `READ ONLY` transaction with a
//!   transaction-scoped `statement_timeout`
//! - A client-side deadline slightly longer than the server timeout backs
//!   it up; a connection that overran it is discarded

pub mod catalog;
pub mod execution;

use super::helpers::{self, CLIENT_DEADLINE_GRACE, ConnectionSlot, connect_with_deadline};
use super::{ConnectorClient, ConnectorContext, ConnectorFactory};
use crate::error::{DataGateError, redact_database_url};
use crate::models::{
    ConnectionTestResult, DataSource, DataSourceType, Dialect, QueryOptions, QueryResult,
    SchemaRequest,
};
use crate::Result;
use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::str::FromStr;
use tracing::debug;

/// Application name reported in `pg_stat_activity`.
pub fn application_name() -> String {
    format!("datagate-{}", env!("CARGO_PKG_VERSION"))
}

/// Builds connect options from a resolved URL, forcing read-only sessions.
///
/// # Errors
/// Returns a configuration error if the URL cannot be parsed; the message
/// carries only the redacted URL.
pub fn connect_options(url: &str) -> Result<PgConnectOptions> {
    let options = PgConnectOptions::from_str(url).map_err(|_| {
        DataGateError::configuration(format!(
            "Invalid PostgreSQL connection string: {}",
            redact_database_url(url)
        ))
    })?;

    Ok(options
        .application_name(&application_name())
        .options([("default_transaction_read_only", "on")]))
}

/// Client over a single PostgreSQL connection.
pub struct PostgresClient {
    data_source: DataSource,
    context: ConnectorContext,
    slot: ConnectionSlot<PgConnection>,
}

impl std::fmt::Debug for PostgresClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresClient")
            .field("data_source", &self.data_source.id)
            .finish_non_exhaustive()
    }
}

impl PostgresClient {
    pub fn new(data_source: DataSource, context: ConnectorContext) -> Self {
        Self {
            data_source,
            context,
            slot: ConnectionSlot::new(),
        }
    }

    async fn open(&self) -> Result<PgConnection> {
        let url = self.context.connection_url(&self.data_source)?;
        let options = connect_options(&url)?;
        debug!(
            source = %self.data_source.id,
            url = %redact_database_url(&url),
            "Connecting to PostgreSQL"
        );
        connect_with_deadline(self.context.settings.connect_timeout, options.connect()).await
    }

    async fn connection(&self) -> Result<tokio::sync::MappedMutexGuard<'_, PgConnection>> {
        self.slot.acquire(|| self.open()).await
    }
}

#[async_trait]
impl ConnectorClient for PostgresClient {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
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
            Dialect::PostgreSql.default_schema(),
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
        Ok(crate::tables::intersect_tables(
            tables,
            candidates,
            Dialect::PostgreSql.default_schema(),
        ))
    }

    async fn execute_query(&self, sql: &str, options: &QueryOptions) -> Result<QueryResult> {
        let mut conn = self.connection().await?;
        let deadline = options.timeout.saturating_add(CLIENT_DEADLINE_GRACE);
        let outcome =
            tokio::time::timeout(deadline, execution::execute(&mut conn, sql, options)).await;

        match outcome {
            Ok(result) => result,
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

/// Factory for PostgreSQL sources.
#[derive(Debug, Clone)]
pub struct PostgresFactory {
    context: ConnectorContext,
}

impl PostgresFactory {
    pub fn new(context: ConnectorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ConnectorFactory for PostgresFactory {
    fn type_tag(&self) -> &str {
        DataSourceType::Postgres.tag()
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn ConnectorClient>> {
        if data_source.source_type != DataSourceType::Postgres {
            return Err(DataGateError::configuration(format!(
                "PostgreSQL connector cannot serve a {} data source",
                data_source.source_type
            )));
        }
        Ok(Box::new(PostgresClient::new(
            data_source.clone(),
            self.context.clone(),
        )))
    }
}
