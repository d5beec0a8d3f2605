use serde::{Deserialize, Serialize};

use crate::{normalize_tags, BoardError, Job, JobStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct JobQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Filter, order and paginate `jobs`.
///
/// Results are always sorted by `order`; `total` counts every match before
/// pagination.
///
/// # Errors
/// Returns [`BoardError::InvalidArgument`] for a zero page or a page size
/// outside `1..=MAX_PAGE_SIZE`.
pub fn apply_query(mut jobs: Vec<Job>, query: &JobQuery) -> Result<JobPage, BoardError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(BoardError::InvalidArgument("page MUST be >= 1".to_string()));
    }
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(BoardError::InvalidArgument(format!(
            "page_size MUST be within 1..={MAX_PAGE_SIZE}"
        )));
    }

    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
        .map(str::to_lowercase);

    let wanted_tags = normalize_tags(query.tags.clone());

    jobs.retain(|job| {
        query.status.map_or(true, |status| job.status == status)
            && wanted_tags.iter().all(|tag| has_tag(job, tag))
            && needle
                .as_deref()
                .map_or(true, |needle| matches_search(job, needle))
    });
    jobs.sort_by_key(|job| (job.order, job.id));

    let total = jobs.len();
    let skip = (page as usize - 1).saturating_mul(page_size as usize);
    let items = jobs.into_iter().skip(skip).take(page_size as usize).collect();

    Ok(JobPage {
        items,
        total,
        page,
        page_size,
    })
}

fn has_tag(job: &Job, tag: &str) -> bool {
    job.tags.iter().any(|have| have.eq_ignore_ascii_case(tag))
}

fn matches_search(job: &Job, needle: &str) -> bool {
    job.title.to_lowercase().contains(needle)
        || job.slug.contains(needle)
        || job.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
}
