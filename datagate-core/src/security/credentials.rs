//! Connection URL resolution from encrypted data-source columns.

use super::vault::Vault;
use crate::error::DataGateError;
use crate::models::{DataSource, DataSourceType};
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

/// Resolves a usable connection URL for `data_source`.
///
/// Resolution order:
/// 1. the decrypted full connection URL, if one is stored
/// 2. a URL assembled from host, port, database, username and the decrypted
///    password (SQLite: from the database path)
/// 3. `default_url`
///
/// When `vault` is `None` and a secret must be decrypted, the process-wide
/// [`Vault::global`] is used.
///
/// # Security
/// The returned URL is zeroized on drop. Log it only through
/// [`crate::error::redact_database_url`].
///
/// # Errors
/// Returns a decryption error for corrupt secret columns, and a
/// configuration error when no URL can be produced or the vault secret is
/// missing.
pub fn resolve_connection_url(
    data_source: &DataSource,
    vault: Option<&Vault>,
    default_url: Option<&str>,
) -> crate::Result<Zeroizing<String>> {
    if !data_source.connection_url.is_empty() {
        let vault = vault_or_global(vault)?;
        if let Some(url) = vault.decrypt_columns(&data_source.connection_url)? {
            debug!(source = %data_source.id, "Using stored connection URL");
            return Ok(url);
        }
    }

    if let Some(url) = assemble_url(data_source, vault)? {
        debug!(source = %data_source.id, "Assembled connection URL from attributes");
        return Ok(url);
    }

    if let Some(url) = default_url.filter(|u| !u.trim().is_empty()) {
        debug!(source = %data_source.id, "Falling back to default database URL");
        return Ok(Zeroizing::new(url.to_string()));
    }

    Err(DataGateError::configuration(format!(
        "No connection URL available for data source {}",
        data_source.id
    )))
}

fn vault_or_global(vault: Option<&Vault>) -> crate::Result<&Vault> {
    match vault {
        Some(vault) => Ok(vault),
        None => Vault::global(),
    }
}

fn scheme_for(source_type: DataSourceType) -> Option<&'static str> {
    match source_type {
        DataSourceType::Postgres => Some("postgresql"),
        DataSourceType::MySql => Some("mysql"),
        DataSourceType::Sqlite | DataSourceType::Csv => None,
    }
}

fn assemble_url(
    data_source: &DataSource,
    vault: Option<&Vault>,
) -> crate::Result<Option<Zeroizing<String>>> {
    if data_source.source_type == DataSourceType::Sqlite {
        return Ok(data_source
            .database
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(|path| Zeroizing::new(format!("sqlite://{}", path))));
    }

    let Some(scheme) = scheme_for(data_source.source_type) else {
        return Ok(None);
    };
    let Some(host) = data_source.host.as_deref().filter(|h| !h.trim().is_empty()) else {
        return Ok(None);
    };

    let invalid = || DataGateError::configuration("Data source connection attributes are invalid");

    let mut url = Url::parse(&format!("{}://{}", scheme, host)).map_err(|_| invalid())?;
    url.set_port(data_source.port).map_err(|()| invalid())?;

    if let Some(username) = data_source.username.as_deref() {
        url.set_username(username).map_err(|()| invalid())?;
    }

    if !data_source.password.is_empty() {
        let vault = vault_or_global(vault)?;
        if let Some(password) = vault.decrypt_columns(&data_source.password)? {
            url.set_password(Some(password.as_str()))
                .map_err(|()| invalid())?;
        }
    }

    if let Some(database) = data_source.database.as_deref() {
        url.set_path(&format!("/{}", database));
    }

    Ok(Some(Zeroizing::new(url.to_string())))
}
