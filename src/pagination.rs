//! Page-number pagination over the protocol's forward-only cursor.
//!
//! Page 1 is a real paged-results search. Any later page is served by one
//! unpaginated search of the whole result set, sliced in memory, because the
//! protocol cannot jump to an arbitrary page. That costs O(total) per deep
//! page; callers that need cheap deep paging would have to keep the cursor
//! chain per browsing session instead.

use serde::Serialize;
use tracing::{debug, info};

use crate::entry::DirectoryEntry;
use crate::errors::{DirectoryError, Result};
use crate::session::{DirectorySession, PageCursor, SearchQuery};

/// Largest accepted page size
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// Default page size for the browse view
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// A validated page request (page ≥ 1, 1 ≤ page size ≤ 10000)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 {
            return Err(DirectoryError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(DirectoryError::ValidationError(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Half-open index range of this page within the full result list.
    fn bounds(&self) -> (usize, usize) {
        let size = self.page_size as usize;
        let start = (self.page as usize - 1).saturating_mul(size);
        (start, start.saturating_add(size))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub entries: Vec<DirectoryEntry>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

/// Fetches the requested page of `query`.
pub async fn fetch_page<S>(session: &mut S, query: &SearchQuery, request: PageRequest) -> Result<Page>
where
    S: DirectorySession + ?Sized,
{
    if request.page == 1 {
        let outcome = session
            .search(query, request.page_size, &PageCursor::start())
            .await?;
        let total = outcome.total.unwrap_or(outcome.entries.len());
        debug!(
            "fetch_page: page 1 returned {} of {} entries (more: {})",
            outcome.entries.len(),
            total,
            outcome.has_more
        );
        return Ok(Page {
            entries: outcome.entries,
            total,
            page: 1,
            page_size: request.page_size,
            has_more: outcome.has_more,
        });
    }

    info!(
        "fetch_page: page {} needs a full search of {} ({})",
        request.page, query.base_dn, query.filter
    );
    let outcome = session.search(query, 0, &PageCursor::start()).await?;
    let all = outcome.entries;
    let total = all.len();
    let (start, end) = request.bounds();

    let entries: Vec<DirectoryEntry> = all
        .into_iter()
        .skip(start)
        .take(request.page_size as usize)
        .collect();

    Ok(Page {
        entries,
        total,
        page: request.page,
        page_size: request.page_size,
        has_more: end < total,
    })
}
