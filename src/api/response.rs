//! Success envelope shared by every JSON endpoint.

use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::{Page, Pagination};

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub timestamp: String,
    pub path: String,
}

/// `{code, status, data, pagination?, timestamp, path}`
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    path: String,
    data: T,
    pagination: Option<Pagination>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, uri: &Uri, data: T) -> Self {
        Self {
            status,
            path: uri.path().to_string(),
            data,
            pagination: None,
        }
    }

    pub fn ok(uri: &Uri, data: T) -> Self {
        Self::new(StatusCode::OK, uri, data)
    }

    pub fn created(uri: &Uri, data: T) -> Self {
        Self::new(StatusCode::CREATED, uri, data)
    }

    fn into_envelope(self) -> Envelope<T> {
        Envelope {
            code: self.status.as_u16(),
            status: self
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            data: self.data,
            pagination: self.pagination,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            path: self.path,
        }
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    /// Items of a page with its pagination block
    pub fn paged<U>(uri: &Uri, page: Page<U>) -> Self
    where
        U: Into<T>,
    {
        let page: Page<T> = page.map(Into::into);
        Self {
            status: StatusCode::OK,
            path: uri.path().to_string(),
            data: page.items,
            pagination: Some(page.pagination),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self.into_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PaginationParams;

    #[test]
    fn test_envelope_fields() {
        let uri: Uri = "/api/attendance/today?x=1".parse().unwrap();
        let envelope = ApiResponse::created(&uri, vec![1, 2]).into_envelope();
        assert_eq!(envelope.code, 201);
        assert_eq!(envelope.status, "Created");
        assert_eq!(envelope.path, "/api/attendance/today");
        assert!(envelope.pagination.is_none());

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("pagination").is_none());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_paged_envelope() {
        let uri: Uri = "/api/users".parse().unwrap();
        let page = Page {
            items: vec![1_i64, 2, 3],
            pagination: PaginationParams::new(2, 3).into_pagination(7),
        };
        let envelope = ApiResponse::<Vec<i64>>::paged(&uri, page).into_envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["status"], "OK");
        assert_eq!(json["pagination"]["total"], 7);
        assert_eq!(json["pagination"]["totalPages"], 3);
        assert_eq!(json["pagination"]["page"], 2);
    }
}
