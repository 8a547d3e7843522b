//! Pagination parameters and paginated response envelope.

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Normalized page request (1-based page, bounded limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub limit: u32,
}

impl PageParams {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip before the first row of this page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

/// One page of results.
///
/// # JSON Example
///
/// ```json
/// {
///   "data": [],
///   "total": 42,
///   "page": 1,
///   "limit": 10,
///   "total_pages": 5
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, params: PageParams) -> Self {
        let limit = i64::from(params.limit);
        Self {
            data,
            total,
            page: params.page,
            limit: params.limit,
            total_pages: (total + limit - 1) / limit,
        }
    }

    /// Slice an already filtered, ordered collection.
    pub fn from_vec(items: Vec<T>, params: PageParams) -> Self {
        let total = items.len() as i64;
        let data = items
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.limit as usize)
            .collect();
        Self::new(data, total, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_clamped() {
        let params = PageParams::new(Some(0), Some(1000));
        assert_eq!(params, PageParams { page: 1, limit: MAX_PAGE_SIZE });
        assert_eq!(PageParams::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn from_vec_slices_and_counts_pages() {
        let page = Page::from_vec((1..=25).collect::<Vec<_>>(), PageParams::new(Some(3), Some(10)));
        assert_eq!(page.data, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
    }
}
