use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod engine;
mod fault;
mod memory;
mod ordering;
mod query;
mod slug;
mod store;

pub use engine::OrderEngine;
pub use fault::{ChaosFaults, FaultInjector, FaultPoint, MutationKind, NoFaults, ScriptedFaults};
pub use memory::MemoryStore;
pub use ordering::{
    plan_insert, plan_shift, validate_position, verify_ordering, InsertPlan, OrderingReport,
    ShiftDirection, ShiftPlan,
};
pub use query::{apply_query, JobPage, JobQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use slug::{slugify, unique_slug, FALLBACK_SLUG};
pub use store::{JobReader, OrderedStore, UnitOfWork};

pub const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BoardError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("order conflict for job {id}: expected order {expected}, stored order is {actual}")]
    Conflict {
        id: JobId,
        expected: i64,
        actual: u32,
    },
    #[error("transaction failure: {0}")]
    TransactionFailure(String),
}

impl BoardError {
    /// Stable machine-readable code for the error class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::TransactionFailure(_) => "transaction_failure",
        }
    }

    /// Whether repeating the same call unchanged can succeed.
    ///
    /// Only a failed unit of work qualifies; every other class needs the caller
    /// to re-read state or correct its input first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionFailure(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct JobId(pub Ulid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = BoardError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw.trim())
            .map(Self)
            .map_err(|err| BoardError::InvalidArgument(format!("invalid job id `{raw}`: {err}")))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Active,
    Archived,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub slug: String,
    pub status: JobStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub order: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// Merge a partial field update into this record.
    pub fn apply(&mut self, changes: &JobChanges) {
        if let Some(title) = &changes.title {
            self.title.clone_from(title);
        }
        if let Some(slug) = &changes.slug {
            self.slug.clone_from(slug);
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(tags) = &changes.tags {
            self.tags.clone_from(tags);
        }
        if let Some(order) = changes.order {
            self.order = order;
        }
        if let Some(updated_at) = changes.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// Fields for a job that does not exist yet. `order` is the requested
/// position; `None` appends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub order: Option<i64>,
}

/// Caller-facing partial update. A present `order` repositions the job
/// before the other fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct JobPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub order: Option<i64>,
}

/// Store-level partial update, already validated.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct JobChanges {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub status: Option<JobStatus>,
    pub tags: Option<Vec<String>>,
    pub order: Option<u32>,
    pub updated_at: Option<OffsetDateTime>,
}

impl JobChanges {
    #[must_use]
    pub fn order(order: u32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }
}

/// Trim and bound a job title.
///
/// # Errors
/// Returns [`BoardError::InvalidArgument`] for blank or oversized titles.
pub fn normalize_title(raw: &str) -> Result<String, BoardError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(BoardError::InvalidArgument(
            "title MUST be provided".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(BoardError::InvalidArgument(format!(
            "title MUST be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

/// Normalize a caller-supplied slug into canonical slug form.
///
/// # Errors
/// Returns [`BoardError::InvalidArgument`] when no slug characters remain.
pub fn normalize_slug(raw: &str) -> Result<String, BoardError> {
    if !raw.chars().any(char::is_alphanumeric) {
        return Err(BoardError::InvalidArgument(format!(
            "slug `{raw}` contains no letters or digits"
        )));
    }
    Ok(slugify(raw))
}

/// Trim tags, drop blanks, and de-duplicate while keeping first occurrence.
#[must_use]
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}
