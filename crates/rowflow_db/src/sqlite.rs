//! SQLite backing store (sqlx).
//!
//! The relational side of the store contract: jobs, schemas, and records as
//! three tables with `ON DELETE CASCADE` ownership, JSON text for the
//! dynamic payloads, and a single multi-row `INSERT` per bulk write.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use rowflow_protocol::{Job, JobId, JobStatus, Record, SchemaRecord};

use crate::error::StoreError;
use crate::store::{JobStore, RecordStore, SchemaStore, Store};
use crate::SEARCH_RESULT_CAP;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ingest_jobs (
        id TEXT PRIMARY KEY,
        file_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        status TEXT NOT NULL,
        total_records INTEGER NOT NULL DEFAULT 0,
        processed_records INTEGER NOT NULL DEFAULT 0,
        failed_records INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        error_message TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_schemas (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL UNIQUE REFERENCES ingest_jobs(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        columns TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_records (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES ingest_jobs(id) ON DELETE CASCADE,
        row_number INTEGER NOT NULL,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ingest_records_job_row
        ON ingest_records (job_id, row_number)
    "#,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        info!(path = %path.as_ref().display(), "opened sqlite store");
        Ok(store)
    }

    /// In-memory database on a single connection, for tests and throwaway
    /// runs. A pool of one keeps every query on the same memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        for statement in CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn jobs(&self) -> &dyn JobStore {
        self
    }

    fn schemas(&self) -> &dyn SchemaStore {
        self
    }

    fn records(&self) -> &dyn RecordStore {
        self
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(FromRow)]
struct JobRow {
    id: String,
    file_name: String,
    file_type: String,
    file_size: i64,
    status: String,
    total_records: i64,
    processed_records: i64,
    failed_records: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, StoreError> {
        Ok(Job {
            id: parse_uuid(&row.id)?,
            file_name: row.file_name,
            file_type: row.file_type,
            file_size: row.file_size as u64,
            status: row
                .status
                .parse::<JobStatus>()
                .map_err(StoreError::Corrupt)?,
            total_records: row.total_records as u64,
            processed_records: row.processed_records as u64,
            failed_records: row.failed_records as u64,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: String,
    job_id: String,
    row_number: i64,
    data: String,
}

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, StoreError> {
        Ok(Record {
            id: parse_uuid(&row.id)?,
            job_id: parse_uuid(&row.job_id)?,
            row_number: row.row_number as u64,
            data: serde_json::from_str(&row.data)?,
        })
    }
}

fn parse_uuid(text: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|e| StoreError::Corrupt(format!("bad uuid '{text}': {e}")))
}

fn offset(page: usize, per_page: usize) -> i64 {
    (page.max(1) - 1) as i64 * per_page as i64
}

// ============================================================================
// JobStore
// ============================================================================

#[async_trait]
impl JobStore for SqliteStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_jobs (
                id, file_name, file_type, file_size, status,
                total_records, processed_records, failed_records,
                created_at, started_at, completed_at, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.file_name)
        .bind(&job.file_type)
        .bind(job.file_size as i64)
        .bind(job.status.as_str())
        .bind(job.total_records as i64)
        .bind(job.processed_records as i64)
        .bind(job.failed_records as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM ingest_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET status = ?,
                total_records = ?,
                processed_records = ?,
                failed_records = ?,
                started_at = ?,
                completed_at = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.total_records as i64)
        .bind(job.processed_records as i64)
        .bind(job.failed_records as i64)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, page: usize, per_page: usize) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM ingest_jobs ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM ingest_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// SchemaStore
// ============================================================================

#[async_trait]
impl SchemaStore for SqliteStore {
    async fn insert(&self, schema: &SchemaRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ingest_schemas (id, job_id, file_name, columns) VALUES (?, ?, ?, ?)",
        )
        .bind(schema.id.to_string())
        .bind(schema.job_id.to_string())
        .bind(&schema.file_name)
        .bind(serde_json::to_string(&schema.columns)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_job(&self, job_id: JobId) -> Result<Option<SchemaRecord>, StoreError> {
        let row = sqlx::query("SELECT id, job_id, file_name, columns FROM ingest_schemas WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(SchemaRecord {
                id: parse_uuid(row.get::<String, _>("id").as_str())?,
                job_id: parse_uuid(row.get::<String, _>("job_id").as_str())?,
                file_name: row.get("file_name"),
                columns: serde_json::from_str(row.get::<String, _>("columns").as_str())?,
            })
        })
        .transpose()
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ingest_schemas WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// RecordStore
// ============================================================================

#[async_trait]
impl RecordStore for SqliteStore {
    async fn bulk_insert(&self, records: &[Record]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        // Serialize payloads up front so the builder closure stays fallible-free.
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push((
                record.id.to_string(),
                record.job_id.to_string(),
                record.row_number as i64,
                serde_json::to_string(&record.data)?,
            ));
        }

        let mut tx = self.pool.begin().await?;
        let mut builder =
            QueryBuilder::new("INSERT INTO ingest_records (id, job_id, row_number, data) ");
        builder.push_values(rows, |mut b, (id, job_id, row_number, data)| {
            b.push_bind(id)
                .push_bind(job_id)
                .push_bind(row_number)
                .push_bind(data);
        });
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(batch = records.len(), "bulk inserted records");
        Ok(())
    }

    async fn list_by_job(
        &self,
        job_id: JobId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, row_number, data FROM ingest_records
            WHERE job_id = ?
            ORDER BY row_number ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(job_id.to_string())
        .bind(per_page as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Record::try_from).collect()
    }

    async fn count_by_job(&self, job_id: JobId) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ingest_records WHERE job_id = ?")
                .bind(job_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn delete_by_job(&self, job_id: JobId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ingest_records WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, job_id: JobId, term: &str) -> Result<Vec<Record>, StoreError> {
        // json_each renders JSON booleans as integers; the CASE restores the
        // textual form so "true"/"false" searches behave like the document
        // backing. Objects and arrays never occur in row payloads.
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, row_number, data FROM ingest_records
            WHERE job_id = ?1
              AND EXISTS (
                SELECT 1 FROM json_each(ingest_records.data) AS cell
                WHERE cell.type NOT IN ('null', 'object', 'array')
                  AND instr(
                        lower(CASE cell.type
                            WHEN 'true' THEN 'true'
                            WHEN 'false' THEN 'false'
                            ELSE CAST(cell.value AS TEXT)
                        END),
                        lower(?2)
                      ) > 0
              )
            ORDER BY row_number ASC
            LIMIT ?3
            "#,
        )
        .bind(job_id.to_string())
        .bind(term)
        .bind(SEARCH_RESULT_CAP as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Record::try_from).collect()
    }
}
