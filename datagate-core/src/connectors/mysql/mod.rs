//! MySQL connector.
//!
//! # Module Structure
//! - `catalog`: compact schema and table listing for `DATABASE()`
//! - `execution`: read-only transactional execution and row conversion
//!
//! # Session Safety
//! - `MAX_EXECUTION_TIME` bounds each statement and is restored afterwards
//! - Statements run in a `READ ONLY` transaction
//! - The client-side deadline is slightly longer than the server-side one

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
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use std::str::FromStr;
use tracing::debug;

/// Builds connect options from a resolved URL.
///
/// # Errors
/// Returns a configuration error carrying only the redacted URL
pub fn connect_options(url: &str) -> Result<MySqlConnectOptions> {
    MySqlConnectOptions::from_str(url).map_err(|_| {
        DataGateError::configuration(format!(
            "Invalid MySQL connection string: {}",
            redact_database_url(url)
        ))
    })
}

/// Client over a single MySQL connection.
pub struct MySqlClient {
    data_source: DataSource,
    context: ConnectorContext,
    slot: ConnectionSlot<MySqlConnection>,
}

impl std::fmt::Debug for MySqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlClient")
            .field("data_source", &self.data_source.id)
            .finish_non_exhaustive()
    }
}

impl MySqlClient {
    pub fn new(data_source: DataSource, context: ConnectorContext) -> Self {
        Self {
            data_source,
            context,
            slot: ConnectionSlot::new(),
        }
    }

    async fn open(&self) -> Result<MySqlConnection> {
        let url = self.context.connection_url(&self.data_source)?;
        let options = connect_options(&url)?;
        debug!(
            source = %self.data_source.id,
            url = %redact_database_url(&url),
            "Connecting to MySQL"
        );
        connect_with_deadline(self.context.settings.connect_timeout, options.connect()).await
    }

    async fn connection(&self) -> Result<tokio::sync::MappedMutexGuard<'_, MySqlConnection>> {
        self.slot.acquire(|| self.open()).await
    }
}

#[async_trait]
impl ConnectorClient for MySqlClient {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        helpers::probe(async {
            let mut conn = self.connection().await?;
            sqlx::query("SELECT 1")
                .execute(&mut *conn)
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
        Ok(crate::tables::intersect_tables(tables, candidates, None))
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

/// Factory for MySQL sources.
#[derive(Debug, Clone)]
pub struct MySqlFactory {
    context: ConnectorContext,
}

impl MySqlFactory {
    pub fn new(context: ConnectorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ConnectorFactory for MySqlFactory {
    fn type_tag(&self) -> &str {
        DataSourceType::MySql.tag()
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn ConnectorClient>> {
        if data_source.source_type != DataSourceType::MySql {
            return Err(DataGateError::configuration(format!(
                "MySQL connector cannot serve a {} data source",
                data_source.source_type
            )));
        }
        Ok(Box::new(MySqlClient::new(
            data_source.clone(),
            self.context.clone(),
        )))
    }
}
