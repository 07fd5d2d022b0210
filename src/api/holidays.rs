//! Holiday calendar endpoints.

use axum::{
    extract::{OriginalUri, Path, State},
};
use std::sync::Arc;

use super::audit::{audit_log, snapshot};
use super::auth::AuthUser;
use super::error::ApiError;
use super::extract::ApiJson;
use super::response::ApiResponse;
use super::validation::{validate_holiday, validate_length};
use crate::db::{
    actions, entity_types, modules, Action, CreateHolidayRequest, Holiday, HolidayResponse, Module,
    UpdateHolidayRequest,
};
use crate::engine::clock::format_date;
use crate::engine::CivilTime;
use crate::{AppState, DbPool};

async fn fetch_holiday(db: &DbPool, id: &str) -> Result<Holiday, ApiError> {
    sqlx::query_as::<_, Holiday>("SELECT * FROM holidays WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Holiday not found"))
}

fn civil_date(state: &AppState, value: &str) -> Result<String, ApiError> {
    state
        .attendance
        .civil()
        .parse_date(value)
        .map(format_date)
        .map_err(|e| ApiError::validation_field("date", e))
}

/// POST /api/leave-management/holidays
pub async fn create_holiday(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateHolidayRequest>,
) -> Result<ApiResponse<HolidayResponse>, ApiError> {
    caller.require(Module::Holiday, Action::Create)?;
    validate_holiday(&req).finish()?;
    let date = civil_date(&state, &req.date)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = state.now_stamp();
    sqlx::query(
        r#"
        INSERT INTO holidays (id, name, date, description, is_active, is_optional, created_at, updated_at)
        VALUES (?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(&date)
    .bind(req.description.trim())
    .bind(req.is_optional)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let holiday = HolidayResponse::from(fetch_holiday(&state.db, &id).await?);
    audit_log(
        &state,
        &caller.user,
        modules::HOLIDAY,
        actions::CREATE,
        entity_types::HOLIDAY,
        &id,
        None,
        snapshot(&holiday),
    )
    .await;

    tracing::info!(holiday_id = %id, date = %date, "Holiday created");
    Ok(ApiResponse::created(&uri, holiday))
}

/// GET /api/leave-management/holidays
pub async fn list_holidays(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<Vec<HolidayResponse>>, ApiError> {
    caller.require(Module::Holiday, Action::List)?;
    let holidays: Vec<Holiday> =
        sqlx::query_as("SELECT * FROM holidays WHERE is_active = 1 ORDER BY date ASC")
            .fetch_all(&state.db)
            .await?;
    Ok(ApiResponse::ok(
        &uri,
        holidays.into_iter().map(HolidayResponse::from).collect(),
    ))
}

/// GET /api/leave-management/holidays/year/:year
pub async fn list_holidays_by_year(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(year): Path<i32>,
) -> Result<ApiResponse<Vec<HolidayResponse>>, ApiError> {
    caller.require(Module::Holiday, Action::List)?;
    let (first, last) = CivilTime::year_bounds(year)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid year: {}", year)))?;

    let holidays: Vec<Holiday> = sqlx::query_as(
        "SELECT * FROM holidays WHERE is_active = 1 AND date >= ? AND date <= ? ORDER BY date ASC",
    )
    .bind(format_date(first))
    .bind(format_date(last))
    .fetch_all(&state.db)
    .await?;
    Ok(ApiResponse::ok(
        &uri,
        holidays.into_iter().map(HolidayResponse::from).collect(),
    ))
}

/// GET /api/leave-management/holidays/:id
pub async fn get_holiday(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<HolidayResponse>, ApiError> {
    caller.require(Module::Holiday, Action::Read)?;
    let holiday = fetch_holiday(&state.db, &id).await?;
    Ok(ApiResponse::ok(&uri, holiday.into()))
}

/// PUT /api/leave-management/holidays/:id
pub async fn update_holiday(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateHolidayRequest>,
) -> Result<ApiResponse<HolidayResponse>, ApiError> {
    caller.require(Module::Holiday, Action::Update)?;
    let existing = fetch_holiday(&state.db, &id).await?;

    if let Some(name) = &req.name {
        validate_length("Holiday name", name, 1, 100)
            .map_err(|e| ApiError::validation_field("name", e))?;
    }
    let date = match &req.date {
        Some(date) => civil_date(&state, date)?,
        None => existing.date.clone(),
    };

    sqlx::query(
        r#"
        UPDATE holidays
        SET name = ?, date = ?, description = ?, is_active = ?, is_optional = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim).unwrap_or(&existing.name))
    .bind(&date)
    .bind(req.description.as_deref().map(str::trim).unwrap_or(&existing.description))
    .bind(req.is_active.unwrap_or(existing.is_active))
    .bind(req.is_optional.unwrap_or(existing.is_optional))
    .bind(state.now_stamp())
    .bind(&id)
    .execute(&state.db)
    .await?;

    let before = HolidayResponse::from(existing);
    let after = HolidayResponse::from(fetch_holiday(&state.db, &id).await?);
    audit_log(
        &state,
        &caller.user,
        modules::HOLIDAY,
        actions::UPDATE,
        entity_types::HOLIDAY,
        &id,
        snapshot(&before),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// DELETE /api/leave-management/holidays/:id
pub async fn delete_holiday(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<HolidayResponse>, ApiError> {
    caller.require(Module::Holiday, Action::Delete)?;
    let existing = HolidayResponse::from(fetch_holiday(&state.db, &id).await?);

    sqlx::query("DELETE FROM holidays WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        &caller.user,
        modules::HOLIDAY,
        actions::DELETE,
        entity_types::HOLIDAY,
        &id,
        snapshot(&existing),
        None,
    )
    .await;

    tracing::info!(holiday_id = %id, "Holiday deleted");
    Ok(ApiResponse::ok(&uri, existing))
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::test_support::{body_json, create_user, send, test_state, token_for};
    use crate::db::{SUPER_ADMIN_ROLE, USER_ROLE};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_holiday_crud_and_year_filter() {
        let state = test_state().await;
        let admin = create_user(&state, "admin@example.com", Some(SUPER_ADMIN_ROLE)).await;
        let token = token_for(&state, &admin).await;
        let app = create_router(state);

        for (name, date) in [
            ("Republic Day", "2025-01-26"),
            ("Holi", "2025-03-14"),
            ("New Year", "2026-01-01"),
        ] {
            let response = send(
                &app,
                Method::POST,
                "/api/leave-management/holidays",
                Some(&token),
                Some(json!({"name": name, "date": date, "description": "National holiday"})),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = send(
            &app,
            Method::GET,
            "/api/leave-management/holidays/year/2025",
            Some(&token),
            None,
        )
        .await;
        let body = body_json(response).await;
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Republic Day", "Holi"]);

        let id = body["data"][1]["id"].as_str().unwrap().to_string();
        let response = send(
            &app,
            Method::PUT,
            &format!("/api/leave-management/holidays/{}", id),
            Some(&token),
            Some(json!({"isOptional": true})),
        )
        .await;
        assert_eq!(body_json(response).await["data"]["isOptional"], true);

        let response = send(
            &app,
            Method::DELETE,
            &format!("/api/leave-management/holidays/{}", id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &app,
            Method::GET,
            "/api/leave-management/holidays",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_plain_user_cannot_create_holiday() {
        let state = test_state().await;
        let user = create_user(&state, "ravi@example.com", Some(USER_ROLE)).await;
        let token = token_for(&state, &user).await;
        let app = create_router(state);

        let response = send(
            &app,
            Method::POST,
            "/api/leave-management/holidays",
            Some(&token),
            Some(json!({"name": "Picnic", "date": "2025-05-01", "description": "Team day"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(
            &app,
            Method::POST,
            "/api/leave-management/holidays",
            None,
            Some(json!({"name": "Picnic", "date": "2025-05-01", "description": "Team day"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
