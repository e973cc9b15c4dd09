//! API handlers module

pub mod auth;
pub mod departments;
pub mod health;
pub mod invoices;
pub mod lpos;
pub mod ocr;
pub mod projects;
pub mod reports;
pub mod vendors;

use serde::Deserialize;

/// Largest page a listing will return
pub const MAX_PER_PAGE: u64 = 100;

/// `?page=&per_page=` for listings; pages start at 1
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_bounds() {
        let query = PageQuery::default();
        assert_eq!((query.page(), query.per_page()), (1, 20));

        let query = PageQuery {
            page: Some(0),
            per_page: Some(5000),
        };
        assert_eq!((query.page(), query.per_page()), (1, MAX_PER_PAGE));
    }
}
