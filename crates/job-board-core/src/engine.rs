use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::fault::{FaultInjector, FaultPoint, MutationKind, NoFaults};
use crate::ordering::{plan_insert, plan_shift, validate_position, verify_ordering, InsertPlan};
use crate::ordering::{OrderingReport, ShiftDirection, ShiftPlan};
use crate::query::{apply_query, JobPage, JobQuery};
use crate::slug::{slugify, unique_slug};
use crate::store::{JobReader, OrderedStore, UnitOfWork};
use crate::{
    normalize_slug, normalize_tags, normalize_title, BoardError, Job, JobChanges, JobId, JobPatch,
    NewJob,
};

/// Keeps the live jobs of an [`OrderedStore`] densely ordered `1..=N`.
///
/// Every mutation runs as one unit of work; the fault injector is consulted
/// inside the unit, so an injected failure discards the whole unit.
#[derive(Debug)]
pub struct OrderEngine<S, F = NoFaults> {
    store: S,
    faults: F,
}

impl<S: OrderedStore> OrderEngine<S, NoFaults> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            faults: NoFaults,
        }
    }
}

impl<S: OrderedStore, F: FaultInjector> OrderEngine<S, F> {
    #[must_use]
    pub fn with_faults(store: S, faults: F) -> Self {
        Self { store, faults }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// # Errors
    /// Returns [`BoardError::NotFound`] when no job has `id`.
    pub fn get(&self, id: JobId) -> Result<Job, BoardError> {
        self.store.get(id)?.ok_or(BoardError::NotFound(id))
    }

    /// # Errors
    /// Returns [`BoardError::InvalidArgument`] for invalid pagination.
    pub fn list(&self, query: &JobQuery) -> Result<JobPage, BoardError> {
        apply_query(self.store.list_all()?, query)
    }

    /// Density report over every live job.
    ///
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] when the store cannot be read.
    pub fn verify(&self) -> Result<OrderingReport, BoardError> {
        let orders = self.store.list_all()?.into_iter().map(|job| job.order);
        Ok(verify_ordering(orders))
    }

    /// Create a job, appending it or inserting it at the requested order.
    ///
    /// # Errors
    /// Returns [`BoardError::InvalidArgument`] for a blank title, an explicit
    /// slug already in use, or an order outside `1..=N+1`, and
    /// [`BoardError::TransactionFailure`] when the unit does not commit.
    pub fn create(&mut self, request: NewJob) -> Result<Job, BoardError> {
        let title = normalize_title(&request.title)?;
        let explicit_slug = request.slug.as_deref().map(normalize_slug).transpose()?;
        let status = request.status.unwrap_or_default();
        let requested = request.order;
        let tags = normalize_tags(request.tags);
        if let Some(order) = requested {
            validate_position("order", order, u32::MAX)?;
        }

        let faults = &self.faults;
        let job = self.store.run_as_unit(|unit| {
            let plan = plan_insert(unit.max_order()?, requested)?;
            let slugs = unit.slugs()?;
            let slug = match explicit_slug {
                Some(slug) if slugs.contains(&slug) => return Err(slug_in_use(&slug)),
                Some(slug) => slug,
                None => unique_slug(&slugify(&title), &slugs),
            };

            if let InsertPlan::Insert { shift, .. } = plan {
                apply_shift(unit, faults, MutationKind::Create, shift, None)?;
            }

            let now = OffsetDateTime::now_utc();
            let job = Job {
                id: JobId::new(),
                title,
                slug,
                status,
                tags,
                order: plan.order(),
                created_at: now,
                updated_at: now,
            };
            unit.insert(&job)?;
            faults.check(MutationKind::Create, FaultPoint::BeforeCommit)?;
            Ok(job)
        });

        let job = job.inspect_err(|err| log_failure(MutationKind::Create, None, err))?;
        info!(
            job_id = %job.id,
            order = job.order,
            slug = %job.slug,
            "created job"
        );
        Ok(job)
    }

    /// Move a job from `from_order` to `to_order`, shifting everything in
    /// between by one.
    ///
    /// # Errors
    /// Returns [`BoardError::NotFound`] for an unknown id,
    /// [`BoardError::Conflict`] when the stored order is not `from_order`,
    /// [`BoardError::InvalidArgument`] when `to_order` is outside `1..=N`, and
    /// [`BoardError::TransactionFailure`] when the unit does not commit.
    pub fn reorder(
        &mut self,
        id: JobId,
        from_order: i64,
        to_order: i64,
    ) -> Result<Job, BoardError> {
        validate_position("from_order", from_order, u32::MAX)?;
        validate_position("to_order", to_order, u32::MAX)?;

        let faults = &self.faults;
        let result = self.store.run_as_unit(|unit| {
            let job = unit.get(id)?.ok_or(BoardError::NotFound(id))?;
            if i64::from(job.order) != from_order {
                return Err(BoardError::Conflict {
                    id,
                    expected: from_order,
                    actual: job.order,
                });
            }
            if from_order == to_order {
                return Ok((job, 0));
            }

            let to = validate_position("to_order", to_order, unit.max_order()?)?;
            let (moved, shifted) =
                shift_between(unit, faults, MutationKind::Reorder, id, job.order, to)?;
            faults.check(MutationKind::Reorder, FaultPoint::BeforeCommit)?;
            Ok((moved, shifted))
        });

        let (job, shifted) =
            result.inspect_err(|err| log_failure(MutationKind::Reorder, Some(id), err))?;
        if shifted > 0 || i64::from(job.order) != from_order {
            info!(job_id = %id, from_order, to_order, shifted, "reordered job");
        } else {
            debug!(job_id = %id, order = from_order, "reorder is a no-op");
        }
        Ok(job)
    }

    /// Apply a partial update. A changed `order` repositions the job through
    /// the same shift as [`Self::reorder`] before the other fields land.
    ///
    /// # Errors
    /// Returns [`BoardError::NotFound`] for an unknown id,
    /// [`BoardError::InvalidArgument`] for invalid fields or an order outside
    /// `1..=N`, and [`BoardError::TransactionFailure`] when the unit does not
    /// commit.
    pub fn update(&mut self, id: JobId, patch: JobPatch) -> Result<Job, BoardError> {
        let title = patch.title.as_deref().map(normalize_title).transpose()?;
        let slug = patch.slug.as_deref().map(normalize_slug).transpose()?;
        let tags = patch.tags.map(normalize_tags);
        let status = patch.status;
        let requested = patch.order;
        if let Some(order) = requested {
            validate_position("order", order, u32::MAX)?;
        }

        let faults = &self.faults;
        let result = self.store.run_as_unit(|unit| {
            let job = unit.get(id)?.ok_or(BoardError::NotFound(id))?;
            if let Some(slug) = slug.as_ref().filter(|slug| **slug != job.slug) {
                if unit.slugs()?.contains(slug) {
                    return Err(slug_in_use(slug));
                }
            }

            if let Some(requested) = requested {
                let to = validate_position("order", requested, unit.max_order()?)?;
                if to != job.order {
                    shift_between(unit, faults, MutationKind::Update, id, job.order, to)?;
                }
            }

            let changes = JobChanges {
                title,
                slug,
                status,
                tags,
                order: None,
                updated_at: Some(OffsetDateTime::now_utc()),
            };
            let updated = unit.update(id, &changes)?;
            faults.check(MutationKind::Update, FaultPoint::BeforeCommit)?;
            Ok(updated)
        });

        let job = result.inspect_err(|err| log_failure(MutationKind::Update, Some(id), err))?;
        info!(job_id = %id, order = job.order, "updated job");
        Ok(job)
    }

    /// Remove a job and close the gap it leaves.
    ///
    /// # Errors
    /// Returns [`BoardError::NotFound`] for an unknown id and
    /// [`BoardError::TransactionFailure`] when the unit does not commit.
    pub fn delete(&mut self, id: JobId) -> Result<Job, BoardError> {
        let faults = &self.faults;
        let result = self.store.run_as_unit(|unit| {
            let job = unit.get(id)?.ok_or(BoardError::NotFound(id))?;
            let max_order = unit.max_order()?;
            unit.remove(id)?;
            if job.order < max_order {
                let gap = ShiftPlan {
                    low: job.order + 1,
                    high: max_order,
                    direction: ShiftDirection::Decrement,
                };
                apply_shift(unit, faults, MutationKind::Delete, gap, None)?;
            }
            faults.check(MutationKind::Delete, FaultPoint::BeforeCommit)?;
            Ok(job)
        });

        let job = result.inspect_err(|err| log_failure(MutationKind::Delete, Some(id), err))?;
        info!(job_id = %id, order = job.order, "deleted job");
        Ok(job)
    }
}

/// Relocate `moving` from `from` to `to`: shift the records in between, then
/// place the moved record. This is the only path that moves an existing
/// record; callers guarantee `from != to` and that `to` is a live position.
fn shift_between<F>(
    unit: &mut dyn UnitOfWork,
    faults: &F,
    kind: MutationKind,
    moving: JobId,
    from: u32,
    to: u32,
) -> Result<(Job, usize), BoardError>
where
    F: FaultInjector + ?Sized,
{
    let shifted = match plan_shift(from, to) {
        Some(plan) => apply_shift(unit, faults, kind, plan, Some(moving))?,
        None => 0,
    };
    let changes = JobChanges {
        updated_at: Some(OffsetDateTime::now_utc()),
        ..JobChanges::order(to)
    };
    let moved = unit.update(moving, &changes)?;
    Ok((moved, shifted))
}

fn apply_shift<F>(
    unit: &mut dyn UnitOfWork,
    faults: &F,
    kind: MutationKind,
    plan: ShiftPlan,
    skip: Option<JobId>,
) -> Result<usize, BoardError>
where
    F: FaultInjector + ?Sized,
{
    let affected = unit.range_by_order(plan.low, plan.high)?;
    debug!(
        kind = kind.as_str(),
        low = plan.low,
        high = plan.high,
        direction = ?plan.direction,
        affected = affected.len(),
        "planned order shift"
    );
    faults.check(kind, FaultPoint::AfterRead)?;

    let mut written = 0;
    for job in affected.into_iter().filter(|job| Some(job.id) != skip) {
        let order = plan.shifted(job.order).ok_or_else(|| {
            BoardError::TransactionFailure(format!(
                "order {} of job {} cannot shift",
                job.order, job.id
            ))
        })?;
        unit.update(job.id, &JobChanges::order(order))?;
        written += 1;
        faults.check(kind, FaultPoint::AfterWrite { written })?;
    }
    Ok(written)
}

fn slug_in_use(slug: &str) -> BoardError {
    BoardError::InvalidArgument(format!("slug `{slug}` is already in use"))
}

fn log_failure(kind: MutationKind, id: Option<JobId>, err: &BoardError) {
    let job_id = id.map(|id| id.to_string()).unwrap_or_default();
    let job_id = job_id.as_str();
    let kind = kind.as_str();
    let code = err.code();
    match err {
        BoardError::Conflict { .. } | BoardError::TransactionFailure(_) => {
            warn!(kind, job_id, code, error = %err, "mutation rolled back");
        }
        BoardError::InvalidArgument(_) | BoardError::NotFound(_) => {
            debug!(kind, job_id, code, error = %err, "mutation rejected");
        }
    }
}
