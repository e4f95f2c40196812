//! DataGate command-line front end.
//!
//! Exposes the guarded query flow of `datagate-core` for operators and
//! scripts: validate SQL offline, probe a data source, list its tables, print
//! its compact schema, run guarded SQL, and encrypt secrets for descriptors.
//!
//! # Security Guarantees
//! - SQL runs only through the guardrail and read-only connections
//! - Connection URLs are redacted in logs
//! - Secrets are read without echo and never logged

pub mod cli;
pub mod commands;
pub mod descriptor;

pub use cli::Cli;
pub use commands::execute;
