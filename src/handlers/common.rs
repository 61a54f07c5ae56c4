use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Success envelope used by every endpoint.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { success: true, data })).into_response()
}

pub fn created_response<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(ApiResponse { success: true, data }),
    )
        .into_response()
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PaginationParams {
    pub fn page(&self) -> u64 {
        self.page.filter(|p| *p >= 1).unwrap_or(1)
    }

    /// Clamped to 100; each route supplies its own default page size.
    pub fn limit_or(&self, default: u64) -> u64 {
        self.limit.filter(|l| *l >= 1).unwrap_or(default).min(100)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl PageMeta {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit.max(1)),
        }
    }
}

/// Paginated collection payload carried inside the success envelope.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PageMeta,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: u64, limit: u64, total: u64) -> Self {
        Self {
            items,
            pagination: PageMeta::new(page, limit, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(PageMeta::new(1, 10, 0).pages, 0);
        assert_eq!(PageMeta::new(1, 10, 10).pages, 1);
        assert_eq!(PageMeta::new(1, 10, 11).pages, 2);
    }

    #[test]
    fn params_default_and_clamp() {
        let params = PaginationParams {
            page: Some(0),
            limit: Some(5000),
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit_or(12), 100);

        let params = PaginationParams {
            page: None,
            limit: None,
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit_or(12), 12);
    }
}
