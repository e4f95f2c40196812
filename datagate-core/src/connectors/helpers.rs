//! Helper utilities shared by the dialect connectors.
//!
//! Provides the lazily opened connection slot, statement error
//! classification, deadline wrappers, and the cache-then-filter schema flow
//! so each connector only supplies its catalog query.

use crate::cache::SchemaCache;
use crate::error::DataGateError;
use crate::models::{ConnectionTestResult, SchemaRequest};
use crate::tables::AllowList;
use crate::Result;
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
pub const PG_QUERY_CANCELED: &str = "57014";
/// MySQL `ER_QUERY_TIMEOUT`, raised when `MAX_EXECUTION_TIME` fires.
pub const MYSQL_QUERY_TIMEOUT: &str = "3024";
/// MySQL `ER_QUERY_INTERRUPTED`.
pub const MYSQL_QUERY_INTERRUPTED: &str = "1317";

/// SQLite `SQLITE_INTERRUPT`, raised when a progress handler aborts a statement.
pub const SQLITE_INTERRUPT: &str = "9";

/// Slack added to the client-side deadline so the server-side timeout,
/// which rolls back cleanly, normally fires first.
pub const CLIENT_DEADLINE_GRACE: Duration = Duration::from_millis(500);

// Pattern is a literal
#[allow(clippy::expect_used)]
static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(statement timeout|timed out|timeout|canceling statement|execution was interrupted|maximum statement execution time)")
        .expect("Invalid timeout pattern")
});

/// True when a driver message describes a timed-out or interrupted statement.
pub fn is_timeout_message(message: &str) -> bool {
    TIMEOUT_PATTERN.is_match(message)
}

/// Maps a declared column type onto a single whitespace-free token.
///
/// Inner whitespace runs become `_`; an undeclared type becomes `ANY`.
pub fn single_token_type(declared: &str) -> String {
    let token = declared.split_whitespace().collect::<Vec<_>>().join("_");
    if token.is_empty() {
        "ANY".to_string()
    } else {
        token
    }
}

/// Runs `future` under `timeout`, mapping expiry to [`DataGateError::Timeout`].
pub async fn with_deadline<T, F>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(DataGateError::timeout(timeout)),
    }
}

/// Runs a connectivity probe, timing it and folding any error into the result.
pub async fn probe<F>(future: F) -> ConnectionTestResult
where
    F: Future<Output = Result<()>>,
{
    let started = Instant::now();
    match future.await {
        Ok(()) => ConnectionTestResult::success(started.elapsed()),
        Err(e) => {
            debug!(error = %e, "Connection test failed");
            ConnectionTestResult::failure(started.elapsed(), e.to_string())
        }
    }
}

/// Serves schema text from `cache` or loads and stores it, then applies
/// the allowlist filter from `request`.
pub async fn cached_schema<F, Fut>(
    cache: &SchemaCache,
    ttl: Duration,
    request: &SchemaRequest,
    default_schema: Option<&str>,
    load: F,
) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let cached = if request.cache_key.is_empty() {
        None
    } else {
        cache.get(&request.cache_key)
    };

    let text = match cached {
        Some(text) => text,
        None => {
            let text = load().await?;
            if !request.cache_key.is_empty() {
                cache.set_with_ttl(request.cache_key.clone(), text.clone(), ttl);
            }
            text
        }
    };

    Ok(match &request.allowed_tables {
        Some(allowed) => AllowList::new(allowed, default_schema).filter_schema(&text),
        None => text,
    })
}

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
pub use slot::{ConnectionSlot, catalog_field, classify_query_error, connect_with_deadline};

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
mod slot {
    use super::{
        MYSQL_QUERY_INTERRUPTED, MYSQL_QUERY_TIMEOUT, PG_QUERY_CANCELED, SQLITE_INTERRUPT,
        is_timeout_message,
    };
    use crate::Result;
    use crate::error::DataGateError;
    use std::future::Future;
    use std::time::Duration;
    use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
    use tracing::debug;

    enum SlotState<C> {
        Idle,
        Open(C),
        Closed,
    }

    /// A single lazily opened connection behind an async mutex.
    ///
    /// Once closed the slot stays closed: further use fails with a
    /// connection error instead of silently reconnecting.
    pub struct ConnectionSlot<C> {
        state: Mutex<SlotState<C>>,
    }

    impl<C> Default for ConnectionSlot<C> {
        fn default() -> Self {
            Self {
                state: Mutex::new(SlotState::Idle),
            }
        }
    }

    impl<C: sqlx::Connection> ConnectionSlot<C> {
        pub fn new() -> Self {
            Self::default()
        }

        /// Locks the slot, connecting through `connect` if not yet open.
        ///
        /// # Errors
        /// Returns a connection error if the slot was closed or `connect` fails
        pub async fn acquire<F, Fut>(&self, connect: F) -> Result<MappedMutexGuard<'_, C>>
        where
            F: FnOnce() -> Fut,
            Fut: Future<Output = Result<C>>,
        {
            let mut state = self.state.lock().await;
            let needs_connect = match &*state {
                SlotState::Closed => return Err(DataGateError::client_closed()),
                SlotState::Idle => true,
                SlotState::Open(_) => false,
            };
            if needs_connect {
                let conn = connect().await?;
                debug!("Connection opened");
                *state = SlotState::Open(conn);
            }

            MutexGuard::try_map(state, |state| match state {
                SlotState::Open(conn) => Some(conn),
                _ => None,
            })
            .map_err(|_| DataGateError::client_closed())
        }

        /// Drops a connection left in an unknown state; the next acquire
        /// reconnects.
        pub async fn discard(&self) {
            let mut state = self.state.lock().await;
            if matches!(*state, SlotState::Open(_)) {
                debug!("Discarding connection after client-side deadline");
                *state = SlotState::Idle;
            }
        }

        /// Closes the slot. Safe to call more than once.
        pub async fn close(&self) {
            let previous = {
                let mut state = self.state.lock().await;
                std::mem::replace(&mut *state, SlotState::Closed)
            };
            if let SlotState::Open(conn) = previous {
                if let Err(e) = conn.close().await {
                    debug!(error = %e, "Ignoring error while closing connection");
                }
            }
        }

        /// True once [`ConnectionSlot::close`] has run.
        pub async fn is_closed(&self) -> bool {
            matches!(*self.state.lock().await, SlotState::Closed)
        }
    }

    /// Reads `column` of a catalog row.
    ///
    /// # Errors
    /// Returns a query error naming the column if it is missing or does not
    /// decode as `T`
    pub fn catalog_field<'r, R, T>(row: &'r R, column: &'static str) -> Result<T>
    where
        R: sqlx::Row,
        T: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
        &'static str: sqlx::ColumnIndex<R>,
    {
        row.try_get(column).map_err(|e| {
            DataGateError::query_error(format!("Failed to read catalog column {}", column), e)
        })
    }

    /// Opens a connection under `timeout`.
    ///
    /// # Errors
    /// Returns a connection error on failure or expiry
    pub async fn connect_with_deadline<C, Fut>(timeout: Duration, connect: Fut) -> Result<C>
    where
        Fut: Future<Output = std::result::Result<C, sqlx::Error>>,
    {
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(DataGateError::connection_failed(e)),
            Err(_) => Err(DataGateError::connection(format!(
                "Connection attempt timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Classifies a statement failure as a timeout or a generic query error.
    pub fn classify_query_error(error: sqlx::Error, timeout: Duration) -> DataGateError {
        let timed_out = match &error {
            sqlx::Error::Database(db) => {
                matches!(
                    db.code().as_deref(),
                    Some(
                        PG_QUERY_CANCELED
                            | MYSQL_QUERY_TIMEOUT
                            | MYSQL_QUERY_INTERRUPTED
                            | SQLITE_INTERRUPT
                    )
                ) || is_timeout_message(db.message())
            }
            sqlx::Error::PoolTimedOut => true,
            other => is_timeout_message(&other.to_string()),
        };

        if timed_out {
            DataGateError::timeout(timeout)
        } else {
            DataGateError::query_error("statement failed", error)
        }
    }
}
