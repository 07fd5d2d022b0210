//! Attendance endpoints: the caller's own sessions plus admin overrides.

use axum::{
    extract::{OriginalUri, Path, Query, State},
};
use std::sync::Arc;

use super::audit::{audit_log, snapshot};
use super::auth::AuthUser;
use super::error::ApiError;
use super::extract::ApiJson;
use super::response::ApiResponse;
use crate::db::{
    actions, entity_types, modules, Action, AllUsersAttendanceQuery, AttendanceResponse,
    AttendanceWithUserResponse, CreateAttendanceRequest, DateRangeQuery, LocationRequest, Module,
    PaginationParams, UpdateAttendanceRequest,
};
use crate::AppState;

type Records = ApiResponse<Vec<AttendanceResponse>>;

fn location(body: Option<ApiJson<LocationRequest>>) -> Result<LocationRequest, ApiError> {
    let location = body.map(|ApiJson(l)| l).unwrap_or_default();
    if let Some(lat) = location.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ApiError::validation_field(
                "latitude",
                "Latitude must be between -90 and 90",
            ));
        }
    }
    if let Some(lng) = location.longitude {
        if !(-180.0..=180.0).contains(&lng) {
            return Err(ApiError::validation_field(
                "longitude",
                "Longitude must be between -180 and 180",
            ));
        }
    }
    Ok(location)
}

fn records(uri: &axum::http::Uri, rows: Vec<crate::db::Attendance>) -> Records {
    ApiResponse::ok(uri, rows.into_iter().map(AttendanceResponse::from).collect())
}

/// POST /api/attendance/checkin
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    body: Option<ApiJson<LocationRequest>>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Create)?;
    let record = state
        .attendance
        .check_in(caller.id(), location(body)?)
        .await?;
    Ok(ApiResponse::created(&uri, record.into()))
}

/// POST /api/attendance/start-new-session
pub async fn start_new_session(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    body: Option<ApiJson<LocationRequest>>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Create)?;
    let record = state
        .attendance
        .start_new_session(caller.id(), location(body)?)
        .await?;
    Ok(ApiResponse::created(&uri, record.into()))
}

/// POST /api/attendance/checkout
pub async fn check_out(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    body: Option<ApiJson<LocationRequest>>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Create)?;
    let record = state
        .attendance
        .check_out(caller.id(), location(body)?)
        .await?;
    Ok(ApiResponse::ok(&uri, record.into()))
}

/// GET /api/attendance/today
pub async fn today(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<Records, ApiError> {
    caller.require(Module::Attendance, Action::Read)?;
    let rows = state.attendance.today_attendance(caller.id()).await?;
    Ok(records(&uri, rows))
}

/// GET /api/attendance/date/:date
pub async fn by_date(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(date): Path<String>,
) -> Result<Records, ApiError> {
    caller.require(Module::Attendance, Action::Read)?;
    let rows = state
        .attendance
        .attendance_by_date(caller.id(), &date)
        .await?;
    Ok(records(&uri, rows))
}

/// GET /api/attendance/range?startDate&endDate
pub async fn by_range(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> Result<Records, ApiError> {
    caller.require(Module::Attendance, Action::Read)?;
    let rows = state
        .attendance
        .attendance_by_range(caller.id(), &query.start_date, &query.end_date)
        .await?;
    Ok(records(&uri, rows))
}

/// GET /api/attendance/all
pub async fn all(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<Records, ApiError> {
    caller.require(Module::Attendance, Action::Read)?;
    let rows = state.attendance.all_attendance(caller.id()).await?;
    Ok(records(&uri, rows))
}

/// GET /api/attendance/admin/all-users?date&userId&page&limit
pub async fn all_users(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<AllUsersAttendanceQuery>,
) -> Result<ApiResponse<Vec<AttendanceWithUserResponse>>, ApiError> {
    caller.require_cross_user(Module::Attendance)?;
    let page = state
        .attendance
        .all_users_attendance(
            &query.date,
            query.user_id.as_deref(),
            PaginationParams {
                page: query.page,
                limit: query.limit,
            },
        )
        .await?;
    Ok(ApiResponse::paged(&uri, page))
}

/// POST /api/attendance/admin/create
pub async fn admin_create(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateAttendanceRequest>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Update)?;
    let record = AttendanceResponse::from(state.attendance.admin_create(&req).await?);

    audit_log(
        &state,
        &caller.user,
        modules::ATTENDANCE,
        actions::CREATE,
        entity_types::ATTENDANCE,
        &record.id,
        None,
        snapshot(&record),
    )
    .await;

    Ok(ApiResponse::created(&uri, record))
}

/// PUT /api/attendance/admin/update/:id
pub async fn admin_update(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateAttendanceRequest>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Update)?;
    let (before, after) = state.attendance.admin_update(&id, &req).await?;
    let (before, after) = (AttendanceResponse::from(before), AttendanceResponse::from(after));

    audit_log(
        &state,
        &caller.user,
        modules::ATTENDANCE,
        actions::UPDATE,
        entity_types::ATTENDANCE,
        &id,
        snapshot(&before),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// DELETE /api/attendance/admin/delete/:id
pub async fn admin_delete(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<AttendanceResponse>, ApiError> {
    caller.require(Module::Attendance, Action::Delete)?;
    let removed = AttendanceResponse::from(state.attendance.admin_delete(&id).await?);

    audit_log(
        &state,
        &caller.user,
        modules::ATTENDANCE,
        actions::DELETE,
        entity_types::ATTENDANCE,
        &id,
        snapshot(&removed),
        None,
    )
    .await;

    Ok(ApiResponse::ok(&uri, removed))
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::test_support::{body_json, create_user, send, test_state, token_for};
    use crate::db::{SUPER_ADMIN_ROLE, USER_ROLE};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_check_in_twice_conflicts() {
        let state = test_state().await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        let response = send(
            &app,
            Method::POST,
            "/api/attendance/checkin",
            Some(&token),
            Some(json!({"latitude": 18.52, "longitude": 73.85})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["sessionNumber"], 1);
        assert_eq!(body["data"]["status"], "present");
        assert_eq!(body["data"]["checkInLocation"]["latitude"], 18.52);

        let response = send(&app, Method::POST, "/api/attendance/checkin", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(
            &app,
            Method::POST,
            "/api/attendance/start-new-session",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_checkout_without_session_is_not_found() {
        let state = test_state().await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        let response = send(&app, Method::POST, "/api/attendance/checkout", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_session_cycle_and_today() {
        let state = test_state().await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        for path in [
            "/api/attendance/checkin",
            "/api/attendance/checkout",
            "/api/attendance/start-new-session",
        ] {
            let response = send(&app, Method::POST, path, Some(&token), None).await;
            assert!(response.status().is_success(), "{} failed", path);
        }

        let response = send(&app, Method::GET, "/api/attendance/today", Some(&token), None).await;
        let body = body_json(response).await;
        let sessions = body["data"].as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0]["sessionNumber"], 2);
        assert_eq!(sessions[0]["isCheckedOut"], false);
        assert_eq!(sessions[1]["isCheckedOut"], true);
    }

    #[tokio::test]
    async fn test_invalid_latitude_rejected() {
        let state = test_state().await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        let response = send(
            &app,
            Method::POST,
            "/api/attendance/checkin",
            Some(&token),
            Some(json!({"latitude": 120.0})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_views_and_edits_records() {
        let state = test_state().await;
        let admin = create_user(&state, "admin@example.com", Some(SUPER_ADMIN_ROLE)).await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let user_token = token_for(&state, &user).await;
        let admin_token = token_for(&state, &admin).await;
        let app = create_router(state);

        let response = send(
            &app,
            Method::GET,
            "/api/attendance/admin/all-users?date=2025-03-10",
            Some(&user_token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(
            &app,
            Method::POST,
            "/api/attendance/admin/create",
            Some(&admin_token),
            Some(json!({
                "userId": user.id,
                "date": "2025-03-07",
                "checkInTime": "09:00",
                "checkOutTime": "17:30",
                "status": "present"
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["totalHours"], 8.5);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let response = send(
            &app,
            Method::PUT,
            &format!("/api/attendance/admin/update/{}", id),
            Some(&admin_token),
            Some(json!({"status": "late"})),
        )
        .await;
        assert_eq!(body_json(response).await["data"]["status"], "late");

        let response = send(
            &app,
            Method::GET,
            "/api/attendance/admin/all-users?date=2025-03-07",
            Some(&admin_token),
            None,
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["user"]["email"], "ravi@example.com");

        let response = send(
            &app,
            Method::GET,
            "/api/audit-logs?module=attendance",
            Some(&admin_token),
            None,
        )
        .await;
        assert_eq!(body_json(response).await["pagination"]["total"], 2);

        let response = send(
            &app,
            Method::DELETE,
            &format!("/api/attendance/admin/delete/{}", id),
            Some(&admin_token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
