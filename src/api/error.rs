//! HTTP error type.
//!
//! Every failure leaves the API as `{"error": {"code", "message", "details?"}}`
//! with the HTTP status implied by its kind.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::EngineError;

/// Per-field validation messages, keyed by the camelCase request field
pub type FieldErrors = HashMap<String, Vec<String>>;

/// Failure category; fixes both the status and the wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InternalError,
    DatabaseError,
}

impl ErrorKind {
    const fn parts(self) -> (StatusCode, &'static str) {
        match self {
            ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
            ErrorKind::ValidationError => (StatusCode::BAD_REQUEST, "validation_error"),
            ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ErrorKind::DatabaseError => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }

    pub const fn status(self) -> StatusCode {
        self.parts().0
    }

    pub const fn as_str(self) -> &'static str {
        self.parts().1
    }
}

#[derive(Debug, thiserror::Error)]
#[error("[{}] {message}", .kind.as_str())]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    details: Option<FieldErrors>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: ErrorKind,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a FieldErrors>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&FieldErrors> {
        self.details.as_ref()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Missing, invalid or expired credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Authenticated but not allowed
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// 400 carrying every failing field; a lone message is promoted to the summary
    pub fn validation(errors: FieldErrors) -> Self {
        let mut messages = errors.values().flatten();
        let message = match (errors.len(), messages.next()) {
            (1, Some(only)) => only.clone(),
            (0, _) | (1, None) => "Validation failed".to_string(),
            (n, _) => format!("Validation failed for {} fields", n),
        };
        Self {
            kind: ErrorKind::ValidationError,
            message,
            details: Some(errors),
        }
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(FieldErrors::from([(field.to_string(), vec![message.into()])]))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorPayload {
                code: self.kind,
                message: &self.message,
                details: self.details.as_ref(),
            },
        };
        (self.kind.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return ApiError::conflict("A record with the same key already exists")
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return ApiError::bad_request("Referenced record does not exist")
                }
                _ => {}
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return ApiError::not_found("Record not found");
        }
        tracing::error!(error = %err, "Database error");
        ApiError::database("A database error occurred")
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::bad_request(msg),
            EngineError::NotFound(msg) => ApiError::not_found(msg),
            EngineError::Conflict(msg) => ApiError::conflict(msg),
            EngineError::Database(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well-formed JSON of the wrong shape, e.g. an unknown enum value
            JsonRejection::JsonDataError(err) => ApiError::validation_field("body", err.body_text()),
            other => ApiError::bad_request(other.body_text()),
        }
    }
}

/// Collects per-field validation errors before failing once
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `Result<(), String>` check under `field`
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_kind_parts() {
        assert_eq!(ErrorKind::ValidationError.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorKind::DatabaseError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = EngineError::conflict("Already checked in").into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message(), "Already checked in");

        let err: ApiError = EngineError::not_found("No open session").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = EngineError::validation("bad status").into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "[bad_request] bad status");
    }

    #[test]
    fn test_validation_error_single_field() {
        let err = ApiError::validation_field("email", "Invalid email address");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.message(), "Invalid email address");
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("password", "Password is too short");
        builder.check("email", Err("Invalid email address".to_string()));
        builder.check("firstName", Ok(()));
        builder.add("password", "Password is required");

        assert!(!builder.is_empty());
        let err = builder.finish().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(err.message().contains("2 fields"));

        let details = err.details().unwrap();
        assert_eq!(details["password"].len(), 2);
        assert_eq!(details["email"].len(), 1);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::validation_field("name", "Name is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["message"], "Name is required");
        assert_eq!(body["error"]["details"]["name"][0], "Name is required");

        let response = ApiError::forbidden("nope").into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].get("details").is_none());
    }
}
