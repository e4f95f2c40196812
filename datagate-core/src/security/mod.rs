//! Credential protection.
//!
//! - `vault`: AES-256-GCM encryption of stored secrets
//! - `credentials`: connection URL resolution at connect time
//!
//! # Security Guarantees
//! - Secrets stay encrypted until the moment a connection is opened
//! - Decrypted values live in `Zeroizing` containers
//! - URLs are only logged through [`crate::error::redact_database_url`]

mod credentials;
mod vault;

pub use credentials::resolve_connection_url;
pub use vault::{ENCRYPTION_KEY_ENV, EncryptedPayload, Vault};
