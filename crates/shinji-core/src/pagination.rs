//! Offset pagination types for list operations.

use serde::{Deserialize, Serialize};

/// A window into an ordered result set, expressed as skip/limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of rows to skip.
    pub skip: u64,
    /// Maximum number of rows to return.
    pub limit: u64,
}

impl PageRequest {
    /// The default page size.
    pub const DEFAULT_LIMIT: u64 = 100;

    /// Creates a new page request.
    #[must_use]
    pub const fn new(skip: u64, limit: u64) -> Self {
        Self { skip, limit }
    }

    /// Creates a request for the zero-indexed page `page` of `size` rows.
    #[must_use]
    pub const fn page(page: u64, size: u64) -> Self {
        Self {
            skip: page.saturating_mul(size),
            limit: size,
        }
    }

    /// Returns a copy whose limit does not exceed `max_limit`.
    #[must_use]
    pub fn clamped(self, max_limit: u64) -> Self {
        Self {
            skip: self.skip,
            limit: self.limit.min(max_limit),
        }
    }

    /// Returns the request for the following window.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            skip: self.skip.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}

/// A page of results together with the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in this window.
    pub items: Vec<T>,
    /// Number of rows matching the query without skip/limit.
    pub total: u64,
    /// Rows skipped before this window.
    pub skip: u64,
    /// Requested window size.
    pub limit: u64,
}

impl<T> Page<T> {
    /// Creates a new page.
    #[must_use]
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            total,
            skip: request.skip,
            limit: request.limit,
        }
    }

    /// Maps the page content to a different type.
    #[must_use]
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            skip: self.skip,
            limit: self.limit,
        }
    }

    /// Returns true if the page is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if rows remain after this window.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.skip.saturating_add(self.items.len() as u64) < self.total
    }

    /// Returns the request for the following window, if any rows remain.
    #[must_use]
    pub fn next_request(&self) -> Option<PageRequest> {
        self.has_next()
            .then(|| PageRequest::new(self.skip, self.limit).next())
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
