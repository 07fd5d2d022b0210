//! Request extractors whose rejections use the API error body.

use axum::extract::FromRequest;

use super::error::ApiError;

/// `axum::Json` that rejects malformed bodies with [`ApiError`]
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
