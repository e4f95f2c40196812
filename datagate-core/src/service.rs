//! Guarded query flow: resolve a connector, validate, bound, execute, release.
//!
//! [`GuardedQuery`] is the entry point callers use for untrusted SQL. It ties
//! the registry, the guardrail, and a client together so that a statement
//! only reaches a database after passing validation against the tables the
//! connection can actually see, and so that the client is always released.

use crate::connectors::{ConnectorClient, ConnectorRegistry};
use crate::guardrail::Guardrail;
use crate::models::{ConnectionTestResult, DataSource, QueryOptions, QueryResult, SchemaRequest};
use crate::schema::{TableInfo, parse_schema};
use crate::settings::Settings;
use crate::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Bounds and table scope for one guarded query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Row cap enforced by the guardrail and the cursor
    pub max_rows: usize,
    /// Statement timeout
    pub timeout: Duration,
    /// Tables the caller permits; `None` permits every visible table
    pub monitored_tables: Option<Vec<String>>,
}

impl QueryRequest {
    /// Request using the configured row cap and timeout.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_rows: settings.max_rows,
            timeout: settings.query_timeout,
            monitored_tables: None,
        }
    }

    pub fn with_monitored_tables(mut self, tables: Vec<String>) -> Self {
        self.monitored_tables = Some(tables);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Compact schema text together with its parsed form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub text: String,
    pub tables: Vec<TableInfo>,
}

/// Runs untrusted SQL against data sources through the guardrail.
///
/// Each call creates its own client and disconnects it before returning,
/// whether the call succeeded or not.
#[derive(Debug, Clone)]
pub struct GuardedQuery {
    registry: ConnectorRegistry,
}

impl GuardedQuery {
    pub fn new(registry: ConnectorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Validates `sql` against the tables visible to `data_source` (narrowed
    /// to `request.monitored_tables`), applies the row limit, and executes it.
    ///
    /// # Errors
    /// - [`crate::DataGateError::GuardrailRejection`] if validation fails;
    ///   nothing is executed
    /// - [`crate::DataGateError::Timeout`] if the statement overran
    /// - connection, materialization, or query errors from the connector
    pub async fn run(
        &self,
        data_source: &DataSource,
        sql: &str,
        request: &QueryRequest,
    ) -> Result<QueryResult> {
        let client = self.registry.create_client(data_source).await?;
        let outcome = run_with_client(client.as_ref(), sql, request).await;
        client.disconnect().await;

        if let Ok(result) = &outcome {
            info!(
                source = %data_source.id,
                rows = result.row_count,
                "Guarded query completed"
            );
        }
        outcome
    }

    /// Compact schema of `data_source`, restricted to `monitored_tables` when
    /// given, plus its parsed model.
    ///
    /// # Errors
    /// Returns connector errors from connecting or reading the catalog
    pub async fn describe_schema(
        &self,
        data_source: &DataSource,
        monitored_tables: Option<&[String]>,
    ) -> Result<SchemaDescription> {
        let mut request = SchemaRequest::new(data_source.cache_key());
        if let Some(tables) = monitored_tables {
            request = request.with_allowed_tables(tables.to_vec());
        }

        let client = self.registry.create_client(data_source).await?;
        let outcome = client.get_schema(&request).await;
        client.disconnect().await;

        let text = outcome?;
        let tables = parse_schema(&text);
        Ok(SchemaDescription { text, tables })
    }

    /// Tables visible to `data_source`, narrowed to `candidates` when given.
    ///
    /// # Errors
    /// Returns connector errors from connecting or reading the catalog
    pub async fn allowed_tables(
        &self,
        data_source: &DataSource,
        candidates: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let client = self.registry.create_client(data_source).await?;
        let outcome = client.get_allowed_tables(candidates).await;
        client.disconnect().await;
        outcome
    }

    /// Probes connectivity of `data_source`.
    ///
    /// # Errors
    /// Returns error only if no client can be created; connection failures
    /// are reported inside the result
    pub async fn test_connection(&self, data_source: &DataSource) -> Result<ConnectionTestResult> {
        let client = self.registry.create_client(data_source).await?;
        let result = client.test_connection().await;
        client.disconnect().await;
        Ok(result)
    }
}

async fn run_with_client(
    client: &dyn ConnectorClient,
    sql: &str,
    request: &QueryRequest,
) -> Result<QueryResult> {
    let allowed = client
        .get_allowed_tables(request.monitored_tables.as_deref())
        .await?;

    let guardrail = Guardrail::for_dialect(client.dialect(), request.max_rows);
    let bounded = guardrail.prepare(sql, &allowed)?;
    debug!(dialect = %client.dialect(), allowed = allowed.len(), "Query passed guardrail");

    let options = QueryOptions::new(request.timeout).with_limit_rows(request.max_rows);
    client.execute_query(&bounded, &options).await
}
