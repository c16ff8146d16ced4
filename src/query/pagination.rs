use super::error::QueryError;
use super::types::DEFAULT_LIMIT;

/// Inclusive row range handed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: u64,
    pub end: u64,
}

impl RowRange {
    pub fn offset(&self) -> u64 {
        self.start
    }

    pub fn count(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Apply defaults, reject zero values and cap the limit at `max_limit`
    pub fn resolve(page: Option<u32>, limit: Option<u32>, max_limit: Option<u32>) -> Result<Self, QueryError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(QueryError::validation("page must be at least 1"));
        }
        let requested = limit.unwrap_or(DEFAULT_LIMIT);
        if requested == 0 {
            return Err(QueryError::validation("limit must be at least 1"));
        }
        let limit = match max_limit {
            Some(max) if requested > max => {
                tracing::warn!("Limit {} exceeds max {}, capping to max", requested, max);
                max
            }
            _ => requested,
        };
        Ok(Self { page, limit })
    }

    pub fn range(&self) -> RowRange {
        let start = (self.page as u64 - 1) * self.limit as u64;
        RowRange { start, end: start + self.limit as u64 - 1 }
    }

    pub fn has_more(&self, total: u64) -> bool {
        (self.page as u64) * (self.limit as u64) < total
    }
}
