use std::collections::BTreeSet;

use crate::{BoardError, Job, JobChanges, JobId};

/// Read side of the ordered record store.
pub trait JobReader {
    /// Point lookup by id.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the backing store fails.
    fn get(&self, id: JobId) -> Result<Option<Job>, BoardError>;

    /// Records whose order lies in `low..=high`, sorted by order.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the backing store fails.
    fn range_by_order(&self, low: u32, high: u32) -> Result<Vec<Job>, BoardError>;

    /// Highest live order, `0` for an empty store.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the backing store fails.
    fn max_order(&self) -> Result<u32, BoardError>;

    /// Every slug currently in use.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the backing store fails.
    fn slugs(&self) -> Result<BTreeSet<String>, BoardError>;

    /// All live records sorted by order.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the backing store fails.
    fn list_all(&self) -> Result<Vec<Job>, BoardError>;
}

/// Mutations available inside one unit of work. Nothing written here is
/// visible outside the unit until it commits.
pub trait UnitOfWork: JobReader {
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the write is rejected.
    fn insert(&mut self, job: &Job) -> Result<(), BoardError>;

    /// Merge `changes` into the stored record and return the merged record.
    ///
    /// # Errors
    /// Returns [`BoardError::NotFound`] for an unknown id, or
    /// [`BoardError::TransactionFailure`] when the write is rejected.
    fn update(&mut self, id: JobId, changes: &JobChanges) -> Result<Job, BoardError>;

    /// # Errors
    /// Returns [`BoardError::NotFound`] for an unknown id, or
    /// [`BoardError::TransactionFailure`] when the write is rejected.
    fn remove(&mut self, id: JobId) -> Result<(), BoardError>;
}

pub trait OrderedStore: JobReader {
    /// Run `work` as a single unit: every write commits when it returns `Ok`,
    /// none do when it returns `Err`.
    ///
    /// # Errors
    /// Propagates the error from `work`, or returns
    /// [`BoardError::TransactionFailure`] when the unit cannot begin or commit.
    fn run_as_unit<T, F>(&mut self, work: F) -> Result<T, BoardError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, BoardError>;
}
