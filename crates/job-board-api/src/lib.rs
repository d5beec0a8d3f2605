use std::path::PathBuf;
use std::sync::Arc;

use job_board_core::{
    BoardError, ChaosFaults, FaultInjector, Job, JobId, JobPage, JobPatch, JobQuery, NewJob,
    NoFaults, OrderEngine,
};
use job_board_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Board(err) => err.code(),
            Self::Store(_) => "store_failure",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Board(err) => err.is_retryable(),
            Self::Store(_) => false,
        }
    }
}

/// Chaos settings for mutations. All rates default to `0.0`, which disables
/// injection entirely.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FaultConfig {
    #[serde(default)]
    pub reorder_failure_rate: f64,
    #[serde(default)]
    pub mutation_failure_rate: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FaultConfig {
    /// True when neither rate can fire. Out-of-range rates are never disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        [self.reorder_failure_rate, self.mutation_failure_rate]
            .iter()
            .all(|rate| rate.abs() < f64::EPSILON)
    }

    /// # Errors
    /// Returns [`BoardError::InvalidArgument`] when a rate is outside `0.0..=1.0`.
    pub fn build(&self) -> Result<Arc<dyn FaultInjector>, BoardError> {
        let chaos =
            ChaosFaults::new(self.reorder_failure_rate, self.mutation_failure_rate, self.seed)?;
        if self.is_disabled() {
            return Ok(Arc::new(NoFaults));
        }
        tracing::warn!(
            reorder_failure_rate = self.reorder_failure_rate,
            mutation_failure_rate = self.mutation_failure_rate,
            seed = ?self.seed,
            "fault injection enabled"
        );
        Ok(Arc::new(chaos))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReorderRequest {
    pub from_order: i64,
    pub to_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

type Engine = OrderEngine<SqliteStore, Arc<dyn FaultInjector>>;

/// Stateless facade over the `SQLite` job store. Every call opens its own
/// connection, so clones can be shared across threads freely.
#[derive(Debug, Clone)]
pub struct JobBoardApi {
    db_path: PathBuf,
    faults: Arc<dyn FaultInjector>,
}

impl JobBoardApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            faults: Arc::new(NoFaults),
        }
    }

    /// # Errors
    /// Returns [`BoardError::InvalidArgument`] for out-of-range failure rates.
    pub fn with_faults(db_path: PathBuf, faults: &FaultConfig) -> Result<Self, BoardError> {
        Ok(Self {
            db_path,
            faults: faults.build()?,
        })
    }

    fn open_store(&self) -> anyhow::Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn engine(&self) -> Result<Engine, ApiError> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(OrderEngine::with_faults(store, Arc::clone(&self.faults)))
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus, ApiError> {
        let store = self.open_store()?;
        Ok(store.schema_status()?)
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult, ApiError> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run storage and ordering health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport, ApiError> {
        let store = self.open_store()?;
        Ok(store.integrity_check()?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] for rejected input or an aborted unit of
    /// work, and [`ApiError::Store`] when the database cannot be opened.
    pub fn create_job(&self, input: NewJob) -> Result<Job, ApiError> {
        Ok(self.engine()?.create(input)?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] for a malformed or unknown id.
    pub fn get_job(&self, job_id: &str) -> Result<Job, ApiError> {
        let id = parse_job_id(job_id)?;
        Ok(self.engine()?.get(id)?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] for invalid pagination.
    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, ApiError> {
        Ok(self.engine()?.list(query)?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] for a malformed or unknown id, invalid
    /// fields, or an aborted unit of work.
    pub fn update_job(&self, job_id: &str, patch: JobPatch) -> Result<Job, ApiError> {
        let id = parse_job_id(job_id)?;
        Ok(self.engine()?.update(id, patch)?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] carrying `Conflict` when `from_order` is
    /// stale, or any other engine rejection.
    pub fn reorder_job(&self, job_id: &str, request: ReorderRequest) -> Result<Job, ApiError> {
        let id = parse_job_id(job_id)?;
        let ReorderRequest {
            from_order,
            to_order,
        } = request;
        Ok(self.engine()?.reorder(id, from_order, to_order)?)
    }

    /// # Errors
    /// Returns [`ApiError::Board`] for a malformed or unknown id, or an
    /// aborted unit of work.
    pub fn delete_job(&self, job_id: &str) -> Result<Job, ApiError> {
        let id = parse_job_id(job_id)?;
        Ok(self.engine()?.delete(id)?)
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, BoardError> {
    raw.parse()
}
