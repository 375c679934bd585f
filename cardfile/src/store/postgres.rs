//! PostgreSQL storage
//!
//! The production backend. Payloads live in JSONB columns, which gives the
//! predicate compiler its full operator set (`?` key existence, `->` key
//! access, jsonb casts), so whole predicate trees are pushed down as `WHERE`
//! clauses with positional `$n` binds. Loaded rows are still re-checked in
//! memory, and a predicate that reduced to nothing degrades to an unfiltered
//! scan plus that re-check.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use super::{Snapshot, Storage, StoreError, decode_body, row_matches};
use crate::document::Document;
use crate::predicate::Predicate;
use crate::sql::{CompileResult, SqlCompiler};

const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 10;
const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 1;
const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

const RECORDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        sequence_num BIGSERIAL NOT NULL PRIMARY KEY,
        record_type  VARCHAR(128) NOT NULL,
        record_data  JSONB NOT NULL DEFAULT '{}'
    );
";

const SNAPSHOTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        sequence_num BIGSERIAL NOT NULL PRIMARY KEY,
        snapshot_id  VARCHAR(128) NOT NULL UNIQUE,
        record_type  VARCHAR(128) NOT NULL,
        record_data  JSONB NOT NULL DEFAULT '{}'
    );
";

/// Connection settings; zero means "use the default".
#[derive(Debug, Clone, Default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and make sure the tables exist.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        if config.url.is_empty() {
            return Err(StoreError::Config("PostgreSQL URL is required".into()));
        }

        let max_connections = if config.max_connections > 0 {
            config.max_connections
        } else {
            POSTGRES_DEFAULT_MAX_CONNECTIONS
        };
        let min_connections = if config.min_connections > 0 {
            config.min_connections
        } else {
            POSTGRES_DEFAULT_MIN_CONNECTIONS
        };
        let acquire_timeout = if config.acquire_timeout_secs > 0 {
            config.acquire_timeout_secs
        } else {
            POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS
        };

        let options: PgConnectOptions = config
            .url
            .parse()
            .map_err(|e| StoreError::Config(format!("Invalid PostgreSQL URL: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .connect_with(options)
            .await
            .map_err(StoreError::from_postgres)?;

        sqlx::query(RECORDS_SCHEMA)
            .execute(&pool)
            .await
            .map_err(StoreError::from_postgres)?;
        sqlx::query(SNAPSHOTS_SCHEMA)
            .execute(&pool)
            .await
            .map_err(StoreError::from_postgres)?;

        tracing::debug!(
            max_connections,
            min_connections,
            acquire_timeout_secs = acquire_timeout,
            "PostgresStore connected"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }

    async fn load(
        &self,
        table: &'static str,
        query: Option<&Predicate>,
    ) -> Result<Vec<Document>, StoreError> {
        let (sql, params) = select_statement(table, query);
        tracing::debug!(sql = %sql, "loading from postgres");

        let mut stmt = sqlx::query(&sql);
        for param in &params {
            stmt = stmt.bind(param);
        }
        let rows = stmt
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_postgres)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row
                .try_get("record_type")
                .map_err(StoreError::from_postgres)?;
            let raw: String = row
                .try_get("record_data")
                .map_err(StoreError::from_postgres)?;
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
impl Storage for PostgresStore {
    async fn save_records(&self, records: &[Document]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_postgres)?;
        for doc in records {
            let body = serde_json::to_string(&doc.body)
                .map_err(|e| StoreError::decode("records", e.to_string()))?;
            sqlx::query("INSERT INTO records (record_type, record_data) VALUES ($1, $2::jsonb)")
                .bind(&doc.kind)
                .bind(body)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_postgres)?;
        }
        tx.commit().await.map_err(StoreError::from_postgres)?;
        Ok(())
    }

    async fn load_records(&self, query: Option<&Predicate>) -> Result<Vec<Document>, StoreError> {
        self.load("records", query).await
    }

    async fn save_snapshots(&self, snapshots: &[Snapshot]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_postgres)?;
        for (key, doc) in snapshots {
            let body = serde_json::to_string(&doc.body)
                .map_err(|e| StoreError::decode("snapshots", e.to_string()))?;
            sqlx::query(
                "INSERT INTO snapshots (snapshot_id, record_type, record_data)
                 VALUES ($1, $2, $3::jsonb)
                 ON CONFLICT (snapshot_id) DO UPDATE SET
                     record_type = excluded.record_type,
                     record_data = excluded.record_data",
            )
            .bind(key)
            .bind(&doc.kind)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_postgres)?;
        }
        tx.commit().await.map_err(StoreError::from_postgres)?;
        Ok(())
    }

    async fn load_snapshots(
        &self,
        query: Option<&Predicate>,
    ) -> Result<Vec<Document>, StoreError> {
        self.load("snapshots", query).await
    }
}

/// Build the SELECT for one table, embedding the compiled predicate when it
/// reduced. The payload comes back as text so rows parse the same way on
/// every backend.
fn select_statement(table: &str, query: Option<&Predicate>) -> (String, Vec<String>) {
    let mut sql =
        format!("SELECT record_type, record_data::TEXT AS record_data FROM {table}");
    let mut bound: Vec<String> = Vec::new();
    if let Some(predicate) = query {
        let compiler = SqlCompiler::new("record_type", "record_data");
        match compiler.compile(predicate) {
            CompileResult::Reduced { sql: clause, params } => {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
                bound = params.values;
            }
            CompileResult::Residual { predicate } => {
                tracing::debug!(
                    predicate = %predicate,
                    "predicate did not reduce; scanning and filtering in memory"
                );
            }
        }
    }
    sql.push_str(" ORDER BY sequence_num ASC");
    (sql, bound)
}
