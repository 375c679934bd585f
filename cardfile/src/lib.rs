//! cardfile — a document store over SQL
//!
//! Records are typed documents: a type-discriminator string plus a
//! schemaless JSON payload, persisted as one row each. Queries are
//! [`Predicate`] trees — `Is` / `Where` / `And` / `Or` — compiled into
//! parameterized `WHERE` fragments by [`SqlCompiler`] and evaluated directly
//! in memory by [`Predicate::matches`]. Storage backends (PostgreSQL,
//! SQLite, in-memory) push down as much of a predicate as their SQL can
//! express and re-check rows with the matcher, so results are identical
//! across backends.
//!
//! ```
//! use cardfile::{CompileResult, FieldCondition, Predicate, SqlCompiler};
//!
//! let filter = Predicate::and([
//!     Predicate::is(["Deposit"]),
//!     Predicate::field("amount", vec![FieldCondition::ge(50i64)]),
//! ]);
//! let compiler = SqlCompiler::new("record_type", "record_data");
//! match compiler.compile(&filter) {
//!     CompileResult::Reduced { sql, params } => {
//!         assert!(sql.starts_with("(record_type IN ($1)"));
//!         assert_eq!(params.len(), 4);
//!     }
//!     CompileResult::Residual { .. } => unreachable!(),
//! }
//! ```

pub mod document;
pub mod predicate;
pub mod sql;
pub mod store;

pub use document::Document;
pub use predicate::{
    CompareOp, FieldCondition, FilterValue, Predicate, PredicateParseError, ValueFamily,
};
pub use sql::{CompileResult, SqlCompiler, SqlParams};
pub use store::{
    MemoryStore, PostgresConfig, PostgresStore, SqliteStore, Storage, StoreError,
};
