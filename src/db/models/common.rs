//! Common types and utilities shared across models.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Page/limit query parameters (1-indexed pages)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    pub fn into_pagination(self, total: i64) -> Pagination {
        Pagination::new(self.page(), self.limit(), total)
    }
}

/// Pagination metadata carried in the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// A page of results together with its pagination metadata
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Helper to parse a JSON text column, falling back to the type's default
pub fn parse_json_column<T: DeserializeOwned + Default>(json: &str) -> T {
    serde_json::from_str(json).unwrap_or_default()
}

/// Helper to serialize a value into a JSON text column
pub fn to_json_column<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamping() {
        let params = PaginationParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), DEFAULT_LIMIT);
        assert_eq!(params.offset(), 0);

        let params = PaginationParams::new(0, 1000);
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), MAX_LIMIT);

        let params = PaginationParams::new(3, 20);
        assert_eq!(params.offset(), 40);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
        assert_eq!(Pagination::new(1, 10, 11).total_pages, 2);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(8.0), 8.0);
        assert_eq!(round2(1.234), 1.23);
        assert_eq!(round2(1.235_1), 1.24);
    }

    #[test]
    fn test_parse_json_column_falls_back() {
        let parsed: Vec<String> = parse_json_column("not json");
        assert!(parsed.is_empty());
        let parsed: Vec<String> = parse_json_column(r#"["a","b"]"#);
        assert_eq!(parsed, vec!["a", "b"]);
    }
}
