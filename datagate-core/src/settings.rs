//! Process configuration.
//!
//! [`Settings`] collects the tunables of the data-access layer. Values come
//! from `DATAGATE_*` environment variables with safe defaults; the vault
//! secret is read separately by [`crate::security::Vault`] so it never sits in
//! a long-lived, cloneable struct.

use crate::error::{DataGateError, redact_database_url};
use std::time::Duration;

/// Fallback URL for sources without stored credentials.
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATAGATE_DEFAULT_DATABASE_URL";
/// Schema cache TTL in seconds.
pub const SCHEMA_CACHE_TTL_ENV: &str = "DATAGATE_SCHEMA_CACHE_TTL_SECS";
/// Default statement timeout in milliseconds.
pub const QUERY_TIMEOUT_ENV: &str = "DATAGATE_QUERY_TIMEOUT_MS";
/// Row cap applied by the guardrail.
pub const MAX_ROWS_ENV: &str = "DATAGATE_MAX_ROWS";
/// Connection establishment timeout in seconds.
pub const CONNECT_TIMEOUT_ENV: &str = "DATAGATE_CONNECT_TIMEOUT_SECS";

const MAX_ROWS_CEILING: usize = 100_000;

/// Runtime settings of the data-access layer.
///
/// # Security
/// The default database URL may embed a password. `Debug` and `Display`
/// render it through [`redact_database_url`].
///
/// # Example
/// ```rust
/// use datagate_core::Settings;
/// use std::time::Duration;
///
/// let settings = Settings::default()
///     .with_max_rows(250)
///     .with_query_timeout(Duration::from_secs(5));
///
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct Settings {
    /// Used when a data source carries no URL or host of its own
    pub default_database_url: Option<String>,
    /// Lifetime of a cached schema snapshot
    pub schema_cache_ttl: Duration,
    /// Statement timeout for guarded queries
    pub query_timeout: Duration,
    /// Maximum rows a guarded query may return
    pub max_rows: usize,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_database_url: None,
            schema_cache_ttl: Duration::from_secs(300),
            query_timeout: Duration::from_millis(30_000),
            max_rows: 1000,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field(
                "default_database_url",
                &self.default_database_url.as_deref().map(redact_database_url),
            )
            .field("schema_cache_ttl", &self.schema_cache_ttl)
            .field("query_timeout", &self.query_timeout)
            .field("max_rows", &self.max_rows)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Settings(max_rows={}, query_timeout={}ms, cache_ttl={}s{})",
            self.max_rows,
            self.query_timeout.as_millis(),
            self.schema_cache_ttl.as_secs(),
            self.default_database_url
                .as_deref()
                .map_or_else(String::new, |u| format!(", default_url={}", redact_database_url(u)))
        )
    }
}

impl Settings {
    /// Loads settings from `DATAGATE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns a configuration error if a variable is not a valid number or
    /// the resulting settings fail [`Settings::validate`].
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Same as [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup(DEFAULT_DATABASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            settings.default_database_url = Some(url);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, SCHEMA_CACHE_TTL_ENV)? {
            settings.schema_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, QUERY_TIMEOUT_ENV)? {
            settings.query_timeout = Duration::from_millis(ms);
        }
        if let Some(rows) = parse_var::<usize>(&lookup, MAX_ROWS_ENV)? {
            settings.max_rows = rows;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, CONNECT_TIMEOUT_ENV)? {
            settings.connect_timeout = Duration::from_secs(secs);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validates setting values.
    ///
    /// # Errors
    /// Returns error if a value is zero or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.schema_cache_ttl.is_zero() {
            return Err(DataGateError::configuration(
                "schema_cache_ttl must be greater than 0",
            ));
        }

        if self.query_timeout.is_zero() {
            return Err(DataGateError::configuration(
                "query_timeout must be greater than 0",
            ));
        }

        if self.max_rows == 0 {
            return Err(DataGateError::configuration(
                "max_rows must be greater than 0",
            ));
        }

        if self.max_rows > MAX_ROWS_CEILING {
            return Err(DataGateError::configuration(format!(
                "max_rows should not exceed {} for safety",
                MAX_ROWS_CEILING
            )));
        }

        if self.connect_timeout.is_zero() {
            return Err(DataGateError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if let Some(url) = &self.default_database_url {
            url::Url::parse(url).map_err(|_| {
                DataGateError::configuration(format!(
                    "{} is not a valid URL",
                    DEFAULT_DATABASE_URL_ENV
                ))
            })?;
        }

        Ok(())
    }

    /// Builder method to set the fallback database URL.
    pub fn with_default_database_url(mut self, url: impl Into<String>) -> Self {
        self.default_database_url = Some(url.into());
        self
    }

    /// Builder method to set the schema cache TTL.
    pub fn with_schema_cache_ttl(mut self, ttl: Duration) -> Self {
        self.schema_cache_ttl = ttl;
        self
    }

    /// Builder method to set the query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Builder method to set the row cap.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> crate::Result<Option<T>>
where
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            DataGateError::configuration(format!("{} must be a non-negative integer", name))
        }),
    }
}
