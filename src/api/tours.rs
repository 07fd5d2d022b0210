//! Tour (site-visit) endpoints.

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
    actions, entity_types, modules, Action, CreateTourRequest, DateRangeQuery, Module, Tour,
    TourQuery, TourResponse, TourStatus, TourStatusHistoryResponse, UpdateTourRequest,
    UpdateTourStatusRequest,
};
use crate::AppState;

fn tour_list(rows: Vec<Tour>) -> Vec<TourResponse> {
    rows.into_iter().map(TourResponse::from).collect()
}

/// POST /api/tour-management/tours
pub async fn create_tour(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateTourRequest>,
) -> Result<ApiResponse<TourResponse>, ApiError> {
    caller.require(Module::Tour, Action::Create)?;
    let tour = state.tours.create(&caller.user, &req).await?;
    let history = state.tours.history(&tour.id).await?;
    let tour = TourResponse::from(tour).with_history(history);

    audit_log(
        &state,
        &caller.user,
        modules::TOUR,
        actions::CREATE,
        entity_types::TOUR,
        &tour.id,
        None,
        snapshot(&tour),
    )
    .await;

    Ok(ApiResponse::created(&uri, tour))
}

/// GET /api/tour-management/tours
pub async fn list_tours(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<TourQuery>,
) -> Result<ApiResponse<Vec<TourResponse>>, ApiError> {
    caller.require_cross_user(Module::Tour)?;
    let page = state.tours.list(&query).await?;
    Ok(ApiResponse::paged(&uri, page))
}

/// GET /api/tour-management/tours/my
pub async fn my_tours(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<Vec<TourResponse>>, ApiError> {
    let rows = state.tours.for_user(caller.id()).await?;
    Ok(ApiResponse::ok(&uri, tour_list(rows)))
}

/// GET /api/tour-management/tours/range?startDate&endDate
pub async fn tours_in_range(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> Result<ApiResponse<Vec<TourResponse>>, ApiError> {
    caller.require_cross_user(Module::Tour)?;
    let rows = state
        .tours
        .by_expected_time(&query.start_date, &query.end_date)
        .await?;
    Ok(ApiResponse::ok(&uri, tour_list(rows)))
}

/// GET /api/tour-management/tours/:id
pub async fn get_tour(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<TourResponse>, ApiError> {
    let tour = state.tours.get(&id).await?;
    caller.require_owner_or(&tour.assigned_to, Module::Tour, Action::Read)?;
    let history = state.tours.history(&id).await?;
    Ok(ApiResponse::ok(&uri, TourResponse::from(tour).with_history(history)))
}

/// GET /api/tour-management/tours/:id/status-history
pub async fn status_history(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Vec<TourStatusHistoryResponse>>, ApiError> {
    let tour = state.tours.get(&id).await?;
    caller.require_owner_or(&tour.assigned_to, Module::Tour, Action::Read)?;
    let history = state.tours.history(&id).await?;
    Ok(ApiResponse::ok(
        &uri,
        history.into_iter().map(Into::into).collect(),
    ))
}

/// PATCH /api/tour-management/tours/:id
pub async fn update_tour(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateTourRequest>,
) -> Result<ApiResponse<TourResponse>, ApiError> {
    caller.require(Module::Tour, Action::Update)?;
    let (before, after) = state.tours.update(&id, &req).await?;
    let after = TourResponse::from(after);

    audit_log(
        &state,
        &caller.user,
        modules::TOUR,
        actions::UPDATE,
        entity_types::TOUR,
        &id,
        snapshot(&TourResponse::from(before)),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// PATCH /api/tour-management/tours/:id/status
pub async fn update_tour_status(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateTourStatusRequest>,
) -> Result<ApiResponse<TourResponse>, ApiError> {
    match req.status {
        TourStatus::Approved => caller.require(Module::Tour, Action::Approve)?,
        TourStatus::Rejected => caller.require(Module::Tour, Action::Reject)?,
        _ => {
            let tour = state.tours.get(&id).await?;
            caller.require_owner_or(&tour.assigned_to, Module::Tour, Action::Update)?;
        }
    }

    let (before, after) = state.tours.update_status(&id, &caller.user, &req).await?;
    let history = state.tours.history(&id).await?;
    let after = TourResponse::from(after).with_history(history);

    audit_log(
        &state,
        &caller.user,
        modules::TOUR,
        actions::UPDATE,
        entity_types::TOUR,
        &id,
        snapshot(&TourResponse::from(before)),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// DELETE /api/tour-management/tours/:id
pub async fn delete_tour(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<TourResponse>, ApiError> {
    caller.require(Module::Tour, Action::Delete)?;
    let tour = TourResponse::from(state.tours.delete(&id).await?);

    audit_log(
        &state,
        &caller.user,
        modules::TOUR,
        actions::DELETE,
        entity_types::TOUR,
        &id,
        snapshot(&tour),
        None,
    )
    .await;

    Ok(ApiResponse::ok(&uri, tour))
}
