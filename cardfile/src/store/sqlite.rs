//! SQLite storage
//!
//! Single-file storage for local and embedded use: WAL journal mode for
//! concurrent reads, busy timeout instead of immediate lock errors. Payloads
//! live in a TEXT column.
//!
//! SQLite has no operators for testing keys inside a JSON text column the
//! way the PostgreSQL backend uses `?`/`->`, so only type lists are pushed
//! down (`record_type IN (...)`); the rest of the predicate is applied in
//! memory after the scan.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use super::{Snapshot, Storage, StoreError, decode_body, row_matches};
use crate::document::Document;
use crate::predicate::Predicate;

const SQLITE_MAX_CONNECTIONS: u32 = 5;
const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

const RECORDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        sequence_num INTEGER PRIMARY KEY,
        record_type  TEXT NOT NULL,
        record_data  TEXT NOT NULL DEFAULT '{}'
    );
";

const SNAPSHOTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        sequence_num INTEGER PRIMARY KEY,
        snapshot_id  TEXT NOT NULL UNIQUE,
        record_type  TEXT NOT NULL,
        record_data  TEXT NOT NULL DEFAULT '{}'
    );
";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a store at the given database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlite)?;

        sqlx::query(RECORDS_SCHEMA)
            .execute(&pool)
            .await
            .map_err(StoreError::from_sqlite)?;
        sqlx::query(SNAPSHOTS_SCHEMA)
            .execute(&pool)
            .await
            .map_err(StoreError::from_sqlite)?;

        tracing::debug!(path = %path.as_ref().display(), "SqliteStore opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("SQLite pool closed");
    }

    async fn load(
        &self,
        table: &'static str,
        query: Option<&Predicate>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut sql = format!("SELECT record_type, record_data FROM {table}");
        let mut params: Vec<String> = Vec::new();
        if let Some(clause) = query.and_then(|q| reduce_type_filter("record_type", q, &mut params))
        {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        sql.push_str(" ORDER BY sequence_num ASC");
        tracing::debug!(sql = %sql, "loading from sqlite");

        let mut stmt = sqlx::query(&sql);
        for param in &params {
            stmt = stmt.bind(param);
        }
        let rows = stmt
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlite)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("record_type").map_err(StoreError::from_sqlite)?;
            let raw: String = row.try_get("record_data").map_err(StoreError::from_sqlite)?;
            let doc = Document {
                kind,
                body: decode_body(table, &raw)?,
            };
            if row_matches(query, &doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn save_records(&self, records: &[Document]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlite)?;
        for doc in records {
            let body = serde_json::to_string(&doc.body)
                .map_err(|e| StoreError::decode("records", e.to_string()))?;
            sqlx::query("INSERT INTO records (record_type, record_data) VALUES (?, ?)")
                .bind(&doc.kind)
                .bind(body)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlite)?;
        }
        tx.commit().await.map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    async fn load_records(&self, query: Option<&Predicate>) -> Result<Vec<Document>, StoreError> {
        self.load("records", query).await
    }

    async fn save_snapshots(&self, snapshots: &[Snapshot]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlite)?;
        for (key, doc) in snapshots {
            let body = serde_json::to_string(&doc.body)
                .map_err(|e| StoreError::decode("snapshots", e.to_string()))?;
            sqlx::query(
                "INSERT INTO snapshots (snapshot_id, record_type, record_data)
                 VALUES (?, ?, ?)
                 ON CONFLICT(snapshot_id) DO UPDATE SET
                     record_type = excluded.record_type,
                     record_data = excluded.record_data",
            )
            .bind(key)
            .bind(&doc.kind)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlite)?;
        }
        tx.commit().await.map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    async fn load_snapshots(
        &self,
        query: Option<&Predicate>,
    ) -> Result<Vec<Document>, StoreError> {
        self.load("snapshots", query).await
    }
}

/// Push type lists down to SQL with `?` placeholders.
///
/// Conjunctions may keep any subset of their children — dropping an AND
/// child only widens the scan, and the in-memory re-check narrows it back.
/// A disjunction is pushed down only when every alternative reduced, since
/// dropping an OR child would narrow the scan and lose rows for good.
fn reduce_type_filter(
    column: &str,
    pred: &Predicate,
    params: &mut Vec<String>,
) -> Option<String> {
    match pred {
        Predicate::Is { types } => {
            if types.is_empty() {
                return None;
            }
            params.extend(types.iter().cloned());
            let marks = vec!["?"; types.len()].join(", ");
            Some(format!("{column} IN ({marks})"))
        }
        Predicate::And { preds } => {
            let clauses: Vec<String> = preds
                .iter()
                .filter_map(|p| reduce_type_filter(column, p, params))
                .collect();
            if clauses.is_empty() {
                None
            } else {
                Some(format!("({})", clauses.join(" AND ")))
            }
        }
        Predicate::Or { alts } => {
            if alts.is_empty() {
                return None;
            }
            let mut local: Vec<String> = Vec::new();
            let mut clauses = Vec::with_capacity(alts.len());
            for alt in alts {
                clauses.push(reduce_type_filter(column, alt, &mut local)?);
            }
            params.extend(local);
            Some(format!("({})", clauses.join(" OR ")))
        }
        Predicate::Where { .. } => None,
    }
}
