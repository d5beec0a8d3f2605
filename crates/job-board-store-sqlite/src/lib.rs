use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use job_board_core::{
    verify_ordering, BoardError, Job, JobChanges, JobId, JobReader, JobStatus, OrderedStore,
    OrderingReport, UnitOfWork,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
  job_id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(trim(title)) > 0),
  slug TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('active','archived')),
  order_index INTEGER NOT NULL CHECK (order_index >= 1),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_slug ON jobs(slug);
CREATE INDEX IF NOT EXISTS idx_jobs_order_index ON jobs(order_index);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE jobs ADD COLUMN tags_json TEXT NOT NULL DEFAULT '[]';
";

// order_index stays non-unique: a shift passes through transient duplicates
// before the unit commits.
const SELECT_JOB_SQL: &str = r"
SELECT job_id, title, slug, status, tags_json, order_index, created_at, updated_at
FROM jobs
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub ordering: OrderingReport,
    pub schema_status: SchemaStatus,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.quick_check_ok && self.ordering.is_dense()
    }
}

impl SqliteStore {
    /// Open a SQLite-backed job store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) =
            detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "jobs")? {
            self.conn
                .execute_batch(MIGRATION_001_SQL)
                .context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            tracing::info!(version = 1, "applied schema migration");
            return Ok(1);
        }

        if !table_has_column(&self.conn, "jobs", "order_index")? {
            return Err(anyhow!(
                "database schema is invalid: jobs has no order_index column"
            ));
        }

        // Tables exist without migration records: adopt whatever shape is on disk.
        record_schema_version(&self.conn, 1)?;
        if table_has_column(&self.conn, "jobs", "tags_json")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }
        Ok(1)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if table_has_column(&self.conn, "jobs", "tags_json")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .context("failed to start migration v2 transaction")?;
        tx.execute_batch(MIGRATION_002_SQL)
            .context("failed to apply migration v2")?;
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration v2")?;
        tracing::info!(version = 2, "applied schema migration");
        Ok(())
    }

    /// Run quick-check, ordering density, and schema status checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let ordering = if table_exists(&self.conn, "jobs")? {
            let mut stmt = self
                .conn
                .prepare("SELECT order_index FROM jobs")
                .context("failed to prepare order_index scan")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut orders = Vec::new();
            for row in rows {
                // Out-of-range values surface as order 0 so the report flags them.
                orders.push(u32::try_from(row?).unwrap_or(0));
            }
            verify_ordering(orders)
        } else {
            OrderingReport::default()
        };

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            ordering,
            schema_status,
        })
    }
}

impl JobReader for SqliteStore {
    fn get(&self, id: JobId) -> Result<Option<Job>, BoardError> {
        load_job(&self.conn, id).map_err(storage_failure)
    }

    fn range_by_order(&self, low: u32, high: u32) -> Result<Vec<Job>, BoardError> {
        load_range(&self.conn, low, high).map_err(storage_failure)
    }

    fn max_order(&self) -> Result<u32, BoardError> {
        load_max_order(&self.conn).map_err(storage_failure)
    }

    fn slugs(&self) -> Result<BTreeSet<String>, BoardError> {
        load_slugs(&self.conn).map_err(storage_failure)
    }

    fn list_all(&self) -> Result<Vec<Job>, BoardError> {
        load_all(&self.conn).map_err(storage_failure)
    }
}

impl OrderedStore for SqliteStore {
    fn run_as_unit<T, F>(&mut self, work: F) -> Result<T, BoardError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, BoardError>,
    {
        // IMMEDIATE takes the write lock before the first read, so the
        // read-shift-write sequence cannot interleave with another writer.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin unit of work")
            .map_err(storage_failure)?;

        // Dropping `tx` on the error path rolls the unit back.
        let output = work(&mut SqliteUnit { tx: &tx })?;

        tx.commit()
            .context("failed to commit unit of work")
            .map_err(storage_failure)?;
        Ok(output)
    }
}

struct SqliteUnit<'a> {
    tx: &'a Transaction<'a>,
}

impl JobReader for SqliteUnit<'_> {
    fn get(&self, id: JobId) -> Result<Option<Job>, BoardError> {
        load_job(self.tx, id).map_err(storage_failure)
    }

    fn range_by_order(&self, low: u32, high: u32) -> Result<Vec<Job>, BoardError> {
        load_range(self.tx, low, high).map_err(storage_failure)
    }

    fn max_order(&self) -> Result<u32, BoardError> {
        load_max_order(self.tx).map_err(storage_failure)
    }

    fn slugs(&self) -> Result<BTreeSet<String>, BoardError> {
        load_slugs(self.tx).map_err(storage_failure)
    }

    fn list_all(&self) -> Result<Vec<Job>, BoardError> {
        load_all(self.tx).map_err(storage_failure)
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn insert(&mut self, job: &Job) -> Result<(), BoardError> {
        insert_job(self.tx, job).map_err(storage_failure)
    }

    fn update(&mut self, id: JobId, changes: &JobChanges) -> Result<Job, BoardError> {
        let mut job = load_job(self.tx, id)
            .map_err(storage_failure)?
            .ok_or(BoardError::NotFound(id))?;
        job.apply(changes);
        write_job(self.tx, &job).map_err(storage_failure)?;
        Ok(job)
    }

    fn remove(&mut self, id: JobId) -> Result<(), BoardError> {
        let removed = self
            .tx
            .execute("DELETE FROM jobs WHERE job_id = ?1", params![id.to_string()])
            .with_context(|| format!("failed to delete job {id}"))
            .map_err(storage_failure)?;
        if removed == 0 {
            return Err(BoardError::NotFound(id));
        }
        Ok(())
    }
}

fn storage_failure(err: anyhow::Error) -> BoardError {
    tracing::error!(error = %format!("{err:#}"), "sqlite unit of work failed");
    BoardError::TransactionFailure(format!("{err:#}"))
}

struct JobRow {
    job_id: String,
    title: String,
    slug: String,
    status: String,
    tags_json: String,
    order_index: i64,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            status: row.get(3)?,
            tags_json: row.get(4)?,
            order_index: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let id = JobId::from_str(&self.job_id)?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("invalid status `{}` for job {id}", self.status))?;
        let tags: Vec<String> = serde_json::from_str(&self.tags_json)
            .with_context(|| format!("invalid tags_json for job {id}"))?;
        let order = u32::try_from(self.order_index).with_context(|| {
            format!(
                "order_index {} out of range for job {id}",
                self.order_index
            )
        })?;

        Ok(Job {
            id,
            title: self.title,
            slug: self.slug,
            status,
            tags,
            order,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn collect_jobs(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare jobs query")?;
    let rows = stmt.query_map(args, JobRow::from_row)?;
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row?.into_job()?);
    }
    Ok(jobs)
}

fn load_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let row = conn
        .query_row(
            &format!("{SELECT_JOB_SQL} WHERE job_id = ?1"),
            params![id.to_string()],
            JobRow::from_row,
        )
        .optional()
        .with_context(|| format!("failed to load job {id}"))?;
    row.map(JobRow::into_job).transpose()
}

fn load_range(conn: &Connection, low: u32, high: u32) -> Result<Vec<Job>> {
    collect_jobs(
        conn,
        &format!(
            "{SELECT_JOB_SQL} WHERE order_index BETWEEN ?1 AND ?2 ORDER BY order_index, job_id"
        ),
        params![i64::from(low), i64::from(high)],
    )
}

fn load_all(conn: &Connection) -> Result<Vec<Job>> {
    collect_jobs(
        conn,
        &format!("{SELECT_JOB_SQL} ORDER BY order_index, job_id"),
        [],
    )
}

fn load_max_order(conn: &Connection) -> Result<u32> {
    let max: i64 = conn
        .query_row("SELECT COALESCE(MAX(order_index), 0) FROM jobs", [], |row| {
            row.get(0)
        })
        .context("failed to read max order_index")?;
    u32::try_from(max).with_context(|| format!("max order_index {max} out of range"))
}

fn load_slugs(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT slug FROM jobs")
        .context("failed to prepare slug query")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut slugs = BTreeSet::new();
    for row in rows {
        slugs.insert(row?);
    }
    Ok(slugs)
}

fn insert_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs(
           job_id, title, slug, status, tags_json, order_index, created_at, updated_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            job.id.to_string(),
            job.title,
            job.slug,
            job.status.as_str(),
            serde_json::to_string(&job.tags)?,
            i64::from(job.order),
            rfc3339(job.created_at)?,
            rfc3339(job.updated_at)?,
        ],
    )
    .with_context(|| format!("failed to insert job {}", job.id))?;
    Ok(())
}

fn write_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "UPDATE jobs
         SET title = ?2, slug = ?3, status = ?4, tags_json = ?5,
             order_index = ?6, updated_at = ?7
         WHERE job_id = ?1",
        params![
            job.id.to_string(),
            job.title,
            job.slug,
            job.status.as_str(),
            serde_json::to_string(&job.tags)?,
            i64::from(job.order),
            rfc3339(job.updated_at)?,
        ],
    )
    .with_context(|| format!("failed to update job {}", job.id))?;
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "jobs")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "jobs", "tags_json")? {
        return Ok((2, true));
    }

    if table_has_column(conn, "jobs", "order_index")? {
        return Ok((1, true));
    }

    Err(anyhow!("database schema is invalid: jobs has no order_index column"))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
