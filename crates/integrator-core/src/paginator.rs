//! Page-boundary arithmetic for the listing API.
//!
//! A pure computation from (total, page size, current page) to offsets and
//! page existence. Page size and page number arrive as caller-supplied
//! strings and fall back to defaults when unparseable rather than erroring.

use serde::Serialize;

/// Default page size when the caller's value cannot be parsed.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Computed pagination state for one listing response.
///
/// Construction via [`Paginator::new`] is deterministic: identical inputs
/// always produce identical output, and no derived value is ever negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginator {
    /// Total number of pages.
    pub page_count: i64,
    /// Items per page; acts as the query LIMIT.
    pub page_size: i64,
    /// Total matching records.
    pub total: i64,
    /// Requested page, 1-based.
    pub current_page: i64,
    /// Page number of the next page, 0 when there is none.
    pub next_page: i64,
    /// Page number of the previous page, 0 when there is none.
    pub previous_page: i64,
    /// Query OFFSET for the current page.
    pub offset: i64,
    /// Whether the requested page actually exists.
    pub page_exists: bool,
    /// Whether limiting is applied at all.
    pub paging: bool,
}

impl Paginator {
    /// Builds a paginator from caller-supplied strings.
    ///
    /// `page_size` defaults to 50 and `page` to 1 when unparseable or not a
    /// positive integer; the guard keeps every later division well-defined.
    pub fn new(total: i64, page_size: &str, page: &str, paging: bool) -> Self {
        let page_size = match page_size.parse::<i64>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::debug!(page_size, "unparseable page size, defaulting to 50");
                DEFAULT_PAGE_SIZE
            },
        };
        let current_page = match page.parse::<i64>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::debug!(page, "unparseable page, defaulting to 1");
                1
            },
        };

        let mut p = Self {
            page_count: 0,
            page_size,
            total: total.max(0),
            current_page,
            next_page: 0,
            previous_page: 0,
            offset: 0,
            page_exists: false,
            paging,
        };
        p.page_count = p.pages();
        p.offset = p.first_item() - 1;
        if p.has_prev() {
            p.previous_page = p.current_page - 1;
        }
        if p.has_next() {
            p.next_page = p.current_page + 1;
        }
        p.page_exists = p.has_page(p.current_page);
        p
    }

    /// Number of pages needed to hold `total` items.
    pub fn pages(&self) -> i64 {
        // ceil(total / page_size) in integer arithmetic; page_size >= 1.
        (self.total + self.page_size - 1) / self.page_size
    }

    /// True when there is at least one item.
    pub fn has_pages(&self) -> bool {
        self.total >= 1
    }

    /// True when `page` is a valid page of this result set.
    pub fn has_page(&self, page: i64) -> bool {
        self.has_pages() && page >= 1 && page <= self.pages()
    }

    /// True when a next page exists.
    pub fn has_next(&self) -> bool {
        self.has_page(self.current_page + 1)
    }

    /// True when a previous page exists.
    pub fn has_prev(&self) -> bool {
        self.has_page(self.current_page - 1)
    }

    /// Ordinal of the first item on the current page.
    ///
    /// `total + 1` when the requested page lies beyond the last page — the
    /// out-of-range signal callers rely on.
    pub fn first_item(&self) -> i64 {
        if self.pages() < self.current_page {
            return self.total + 1;
        }
        ((self.current_page - 1) * self.page_size + 1).min(self.total)
    }

    /// Ordinal of the last item on the current page.
    pub fn last_item(&self) -> i64 {
        (self.first_item() + self.page_size - 1).min(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_records_five_per_page() {
        let p = Paginator::new(16, "5", "1", true);
        assert_eq!(p.page_count, 4);
        assert_eq!(p.first_item(), 1);
        assert_eq!(p.last_item(), 5);
        assert!(p.has_next());
        assert!(!p.has_prev());
        assert_eq!(p.next_page, 2);
        assert_eq!(p.previous_page, 0);
        assert!(p.page_exists);
    }

    #[test]
    fn twenty_three_records_page_two() {
        let p = Paginator::new(23, "5", "2", true);
        assert_eq!(p.first_item(), 6);
        assert_eq!(p.last_item(), 10);
        assert!(p.has_next());
        assert!(p.has_prev());
        assert_eq!(p.offset, 5);
    }

    #[test]
    fn thirty_records_page_three() {
        let p = Paginator::new(30, "5", "3", true);
        assert_eq!(p.first_item(), 11);
        assert_eq!(p.last_item(), 15);
    }

    #[test]
    fn offset_is_always_first_item_minus_one() {
        for total in [0_i64, 1, 7, 16, 23, 100] {
            for page in ["1", "2", "3", "9"] {
                let p = Paginator::new(total, "5", page, true);
                assert_eq!(p.offset, p.first_item() - 1);
                assert!(p.first_item() <= p.last_item() + 1);
                assert!(p.offset >= 0);
            }
        }
    }

    #[test]
    fn empty_result_set_has_no_pages() {
        let p = Paginator::new(0, "5", "1", true);
        assert!(!p.page_exists);
        assert_eq!(p.page_count, 0);
        // pageCount (0) < currentPage (1), so firstItem is total + 1.
        assert_eq!(p.first_item(), 1);
        assert_eq!(p.offset, 0);
        assert!(!p.has_next());
        assert!(!p.has_prev());
    }

    #[test]
    fn page_beyond_last_signals_out_of_range() {
        let p = Paginator::new(10, "5", "4", true);
        assert!(!p.page_exists);
        assert_eq!(p.first_item(), 11);
        assert_eq!(p.offset, 10);
    }

    #[test]
    fn unparseable_inputs_fall_back_to_defaults() {
        let p = Paginator::new(100, "abc", "xyz", true);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(p.current_page, 1);

        let p = Paginator::new(100, "0", "-3", true);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(p.current_page, 1);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let a = Paginator::new(23, "5", "2", true);
        let b = Paginator::new(23, "5", "2", true);
        assert_eq!(a, b);
    }
}
