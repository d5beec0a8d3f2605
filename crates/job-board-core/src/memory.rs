use std::collections::{BTreeMap, BTreeSet};

use crate::store::{JobReader, OrderedStore, UnitOfWork};
use crate::{BoardError, Job, JobChanges, JobId};

#[derive(Debug, Clone, Default)]
struct JobTable {
    jobs: BTreeMap<JobId, Job>,
}

impl JobTable {
    fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).cloned()
    }

    fn range_by_order(&self, low: u32, high: u32) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| (low..=high).contains(&job.order))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.order, job.id));
        jobs
    }

    fn max_order(&self) -> u32 {
        self.jobs.values().map(|job| job.order).max().unwrap_or(0)
    }

    fn slugs(&self) -> BTreeSet<String> {
        self.jobs.values().map(|job| job.slug.clone()).collect()
    }

    fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| (job.order, job.id));
        jobs
    }
}

/// In-process ordered store. A unit of work runs against a staged copy of
/// the table which replaces the live table only on success.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: JobTable,
    writes: usize,
    commits: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed writes since the store was created.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Units that committed since the store was created.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.jobs.is_empty()
    }
}

impl JobReader for MemoryStore {
    fn get(&self, id: JobId) -> Result<Option<Job>, BoardError> {
        Ok(self.table.get(id))
    }

    fn range_by_order(&self, low: u32, high: u32) -> Result<Vec<Job>, BoardError> {
        Ok(self.table.range_by_order(low, high))
    }

    fn max_order(&self) -> Result<u32, BoardError> {
        Ok(self.table.max_order())
    }

    fn slugs(&self) -> Result<BTreeSet<String>, BoardError> {
        Ok(self.table.slugs())
    }

    fn list_all(&self) -> Result<Vec<Job>, BoardError> {
        Ok(self.table.list_all())
    }
}

impl OrderedStore for MemoryStore {
    fn run_as_unit<T, F>(&mut self, work: F) -> Result<T, BoardError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, BoardError>,
    {
        let mut staged = StagedUnit {
            table: self.table.clone(),
            writes: 0,
        };
        let output = work(&mut staged)?;
        self.table = staged.table;
        self.writes += staged.writes;
        self.commits += 1;
        Ok(output)
    }
}

struct StagedUnit {
    table: JobTable,
    writes: usize,
}

impl JobReader for StagedUnit {
    fn get(&self, id: JobId) -> Result<Option<Job>, BoardError> {
        Ok(self.table.get(id))
    }

    fn range_by_order(&self, low: u32, high: u32) -> Result<Vec<Job>, BoardError> {
        Ok(self.table.range_by_order(low, high))
    }

    fn max_order(&self) -> Result<u32, BoardError> {
        Ok(self.table.max_order())
    }

    fn slugs(&self) -> Result<BTreeSet<String>, BoardError> {
        Ok(self.table.slugs())
    }

    fn list_all(&self) -> Result<Vec<Job>, BoardError> {
        Ok(self.table.list_all())
    }
}

impl UnitOfWork for StagedUnit {
    fn insert(&mut self, job: &Job) -> Result<(), BoardError> {
        if self.table.jobs.contains_key(&job.id) {
            return Err(BoardError::TransactionFailure(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        if self.table.jobs.values().any(|existing| existing.slug == job.slug) {
            return Err(BoardError::TransactionFailure(format!(
                "duplicate slug {}",
                job.slug
            )));
        }
        self.table.jobs.insert(job.id, job.clone());
        self.writes += 1;
        Ok(())
    }

    fn update(&mut self, id: JobId, changes: &JobChanges) -> Result<Job, BoardError> {
        let job = self.table.jobs.get_mut(&id).ok_or(BoardError::NotFound(id))?;
        job.apply(changes);
        self.writes += 1;
        Ok(job.clone())
    }

    fn remove(&mut self, id: JobId) -> Result<(), BoardError> {
        self.table.jobs.remove(&id).ok_or(BoardError::NotFound(id))?;
        self.writes += 1;
        Ok(())
    }
}
