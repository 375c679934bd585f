//! Storage backends
//!
//! Every backend manages the same two tables: an append-only record log and
//! a snapshot table upserted by key. Both are shaped as a type-discriminator
//! column plus a schemaless payload column, which is what the predicate
//! compiler targets.
//!
//! How much of a predicate reaches SQL varies by backend — PostgreSQL pushes
//! the whole tree down, SQLite only type lists, memory nothing — but results
//! are identical everywhere because each backend re-checks loaded rows with
//! the in-memory matcher. A predicate that produces no clause at all simply
//! means an unfiltered scan plus that same re-check.

pub mod error;
mod memory;
mod postgres;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::document::Document;
use crate::predicate::Predicate;

/// A snapshot row: the latest state of something, addressed by key.
pub type Snapshot = (String, Document);

/// The shared capabilities of the storage backends.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Append records to the log.
    async fn save_records(&self, records: &[Document]) -> Result<(), StoreError>;

    /// Load records that match the predicate, in insertion order.
    async fn load_records(&self, query: Option<&Predicate>) -> Result<Vec<Document>, StoreError>;

    /// Insert or replace snapshots by key.
    async fn save_snapshots(&self, snapshots: &[Snapshot]) -> Result<(), StoreError>;

    /// Load snapshots that match the predicate.
    async fn load_snapshots(&self, query: Option<&Predicate>)
    -> Result<Vec<Document>, StoreError>;
}

/// Keep a loaded row only if it matches the full predicate.
fn row_matches(query: Option<&Predicate>, doc: &Document) -> bool {
    query.is_none_or(|q| q.matches(doc))
}

/// Parse a stored payload column back into a JSON object.
fn decode_body(table: &'static str, raw: &str) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::decode(
            table,
            format!("expected an object, got {other}"),
        )),
        Err(e) => Err(StoreError::decode(table, e.to_string())),
    }
}
