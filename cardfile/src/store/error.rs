//! Unified error type for the storage layer
//!
//! Wraps backend-specific errors while preserving which backend produced
//! them. The predicate compiler itself never errors — an uncompilable
//! predicate is a structural outcome, not a failure — so everything here is
//! about connections, statements, and stored bytes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// PostgreSQL database error
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored payload failed to parse back into a JSON object
    #[error("stored payload in `{table}` is not a JSON object: {detail}")]
    Decode { table: &'static str, detail: String },
}

impl StoreError {
    /// Wrap a SQLite-originated sqlx error with preserved context
    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    /// Wrap a PostgreSQL-originated sqlx error with preserved context
    pub fn from_postgres(e: sqlx::Error) -> Self {
        Self::Postgres(e)
    }

    pub fn decode(table: &'static str, detail: impl Into<String>) -> Self {
        Self::Decode {
            table,
            detail: detail.into(),
        }
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
            Self::Config(_) | Self::Io(_) | Self::Decode { .. } => "unknown",
        }
    }
}
