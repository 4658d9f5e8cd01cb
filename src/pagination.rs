//! Client-side page slicing
//!
//! `list_all_emails` fetches every summary in a folder and slices the
//! requested page locally. Pages are 1-based.

/// Page size when none is requested
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page size honoured
pub const MAX_PAGE_SIZE: usize = 100;

/// Resolved page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: usize,
    /// Items per page, within `1..=MAX_PAGE_SIZE`
    pub page_size: usize,
}

impl PageRequest {
    /// Apply defaults and clamp to the accepted ranges
    pub fn new(page: Option<usize>, page_size: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// One page of items plus totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    /// At least 1, even when there are no items
    pub total_pages: usize,
}

/// Slice `items` into the requested page
///
/// Pages past the end are empty but still report the real totals.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total_items = items.len();
    let total_pages = total_items.div_ceil(request.page_size).max(1);
    let start = (request.page - 1).saturating_mul(request.page_size);
    let items = items
        .into_iter()
        .skip(start)
        .take(request.page_size)
        .collect();
    Page {
        items,
        page: request.page,
        page_size: request.page_size,
        total_items,
        total_pages,
    }
}
