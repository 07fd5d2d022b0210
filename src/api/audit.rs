//! Audit log API endpoints and helpers.

use axum::{
    extract::{OriginalUri, Query, State},
    http::HeaderMap,
};
use serde::Serialize;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};

use super::auth::AuthUser;
use super::error::ApiError;
use super::response::ApiResponse;
use crate::db::{
    compute_diff, list_audit_logs, log_audit, Action, AuditLogQuery, AuditLogResponse, Module,
    NewAuditEntry, User,
};
use crate::AppState;

/// Extract client IP address from request headers or connection info.
/// Checks X-Forwarded-For, X-Real-IP headers first (for reverse proxy scenarios),
/// then falls back to the connection info.
pub fn extract_client_ip(headers: &HeaderMap, conn_info: Option<&SocketAddr>) -> Option<String> {
    // X-Forwarded-For is a comma-separated list, the first entry is the client
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first_ip) = forwarded.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }

    conn_info.map(|addr| addr.ip().to_string())
}

/// JSON form of an entity for diffing
pub fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Record a mutation in the audit ledger.
/// Failures are logged and never reach the caller.
#[allow(clippy::too_many_arguments)]
pub async fn audit_log(
    state: &AppState,
    actor: &User,
    module: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    before: Option<Value>,
    after: Option<Value>,
) {
    let changes = compute_diff(before.as_ref(), after.as_ref());
    let entry = NewAuditEntry {
        module,
        action,
        entity_id: Some(entity_id),
        entity_type: Some(entity_type),
        performed_by: &actor.id,
        performed_by_email: Some(&actor.email),
        changes,
        metadata: None,
    };

    if let Err(e) = log_audit(&state.db, entry).await {
        tracing::warn!(
            module = module,
            action = action,
            entity_id = entity_id,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// GET /api/audit-logs
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<ApiResponse<Vec<AuditLogResponse>>, ApiError> {
    caller.require(Module::Reports, Action::List)?;
    let page = list_audit_logs(&state.db, &query).await?;
    Ok(ApiResponse::paged(&uri, page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::api::test_support::{body_json, create_user, send, test_state, token_for};
    use crate::db::{actions, entity_types, modules, SUPER_ADMIN_ROLE, USER_ROLE};
    use axum::http::{HeaderValue, Method, StatusCode};
    use serde_json::json;

    #[test]
    fn test_extract_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, None), None);

        let addr: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        assert_eq!(
            extract_client_ip(&headers, Some(&addr)).as_deref(),
            Some("10.0.0.9")
        );

        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        assert_eq!(
            extract_client_ip(&headers, Some(&addr)).as_deref(),
            Some("192.168.1.2")
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(
            extract_client_ip(&headers, None).as_deref(),
            Some("203.0.113.5")
        );
    }

    #[tokio::test]
    async fn test_audit_log_records_diff() {
        let state = test_state().await;
        let actor = create_user(&state, "admin@example.com", Some(SUPER_ADMIN_ROLE)).await;

        audit_log(
            &state,
            &actor,
            modules::HOLIDAY,
            actions::UPDATE,
            entity_types::HOLIDAY,
            "h1",
            Some(json!({"name": "Diwali", "isOptional": false})),
            Some(json!({"name": "Diwali", "isOptional": true})),
        )
        .await;

        let token = token_for(&state, &actor).await;
        let app = create_router(state);
        let response = send(
            &app,
            Method::GET,
            "/api/audit-logs?module=holiday",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["pagination"]["total"], 1);
        let entry = &body["data"][0];
        assert_eq!(entry["entityId"], "h1");
        assert_eq!(entry["performedByEmail"], "admin@example.com");
        assert_eq!(entry["changes"].as_array().unwrap().len(), 1);
        assert_eq!(entry["changes"][0]["field"], "isOptional");
    }

    #[tokio::test]
    async fn test_audit_logs_need_reports_permission() {
        let state = test_state().await;
        let user = create_user(&state, "plain@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        let response = send(&app, Method::GET, "/api/audit-logs", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
