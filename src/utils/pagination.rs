use serde::Serialize;
use utoipa::ToSchema;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Resolved page window for a list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    pub fn meta(&self, total: i64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
            total_pages: (total + self.limit as i64 - 1) / self.limit as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Pagination {
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub limit: u32,
    #[schema(example = 42)]
    pub total: i64,
    #[schema(example = 3)]
    pub total_pages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: 20 });
        assert_eq!(Page::new(Some(0), Some(1000)), Page { page: 1, limit: 100 });
        assert_eq!(Page::new(Some(3), Some(0)).limit, 1);
    }

    #[test]
    fn offset_and_total_pages() {
        let page = Page::new(Some(3), Some(10));
        assert_eq!(page.offset(), 20);
        assert_eq!(page.meta(21).total_pages, 3);
        assert_eq!(page.meta(20).total_pages, 2);
        assert_eq!(page.meta(0).total_pages, 0);
    }
}
