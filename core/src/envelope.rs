//! Normalized response envelopes.
//!
//! # Design
//! `ApiResponse` fields are private and only set through constructors, so
//! `success == true` always means data is present and no error is set.
//! `Pagination` derives `total_pages`, `has_next` and `has_prev` from
//! `(page, limit, total)`; none of them can be set independently.
//!
//! `error_response` is the only place server-side failures are turned into
//! envelopes. Anything that is not an `ApiError` becomes a generic 500 so
//! internal error text never reaches a client.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorKind};

pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    success: bool,
    status: u16,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, status: u16) -> Self {
        Self {
            data: Some(data),
            error: None,
            message: None,
            code: None,
            success: true,
            status,
        }
    }

    pub fn failure(error: impl Into<String>, status: u16) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
            message: None,
            code: None,
            success: false,
            status,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    page: u64,
    limit: u64,
    total: u64,
    total_pages: u64,
    has_next: bool,
    has_prev: bool,
}

impl Pagination {
    /// A `limit` of zero yields zero pages.
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_prev(&self) -> bool {
        self.has_prev
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(flatten)]
    response: ApiResponse<Vec<T>>,
    pagination: Pagination,
}

impl<T> PaginatedResponse<T> {
    pub fn response(&self) -> &ApiResponse<Vec<T>> {
        &self.response
    }

    pub fn items(&self) -> &[T] {
        self.response.data().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn status(&self) -> u16 {
        self.response.status()
    }
}

pub fn success_response<T>(data: T) -> ApiResponse<T> {
    ApiResponse::success(data, 200)
}

/// Map a caught error into an error envelope.
///
/// An `ApiError` keeps its message and code. Its status is kept when it is an
/// HTTP error status; client-side statuses (0 for timeouts, cancellations and
/// network failures) become 504 for a timeout and 500 otherwise, so the
/// envelope status is always one a response can carry.
pub fn error_response<T>(err: &(dyn std::error::Error + 'static)) -> ApiResponse<T> {
    match err.downcast_ref::<ApiError>() {
        Some(api) => {
            let status = match api.status {
                400..=599 => api.status,
                _ if api.kind == ErrorKind::Timeout => 504,
                _ => 500,
            };
            let response = ApiResponse::failure(api.message.clone(), status);
            match &api.code {
                Some(code) => response.with_code(code.clone()),
                None => response,
            }
        }
        None => ApiResponse::failure(INTERNAL_SERVER_ERROR, 500),
    }
}

pub fn paginated_response<T>(data: Vec<T>, page: u64, limit: u64, total: u64) -> PaginatedResponse<T> {
    PaginatedResponse {
        response: success_response(data),
        pagination: Pagination::new(page, limit, total),
    }
}
