//! Leave request endpoints.

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
    actions, entity_types, modules, Action, ApproveLeaveRequest, CreateLeaveRequest,
    DateRangeQuery, LeaveBalance, LeaveDecision, LeaveQuery, LeaveRequest, LeaveRequestResponse,
    Module, RejectLeaveRequest, UpdateLeaveRequest,
};
use crate::AppState;

type Leaves = ApiResponse<Vec<LeaveRequestResponse>>;

fn leaves(uri: &axum::http::Uri, rows: Vec<LeaveRequest>) -> Leaves {
    ApiResponse::ok(uri, rows.into_iter().map(LeaveRequestResponse::from).collect())
}

async fn audit_update(state: &AppState, caller: &AuthUser, before: LeaveRequest, after: &LeaveRequestResponse) {
    audit_log(
        state,
        &caller.user,
        modules::LEAVE,
        actions::UPDATE,
        entity_types::LEAVE_REQUEST,
        &after.id,
        snapshot(&LeaveRequestResponse::from(before)),
        snapshot(after),
    )
    .await;
}

/// POST /api/leave-management/leave-requests
pub async fn create_leave(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateLeaveRequest>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    caller.require(Module::Leave, Action::Create)?;
    let leave = LeaveRequestResponse::from(state.leave.create(caller.id(), &req).await?);

    audit_log(
        &state,
        &caller.user,
        modules::LEAVE,
        actions::CREATE,
        entity_types::LEAVE_REQUEST,
        &leave.id,
        None,
        snapshot(&leave),
    )
    .await;

    Ok(ApiResponse::created(&uri, leave))
}

/// GET /api/leave-management/leave-requests
pub async fn list_leaves(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<LeaveQuery>,
) -> Result<Leaves, ApiError> {
    caller.require_cross_user(Module::Leave)?;
    let page = state.leave.list(&query).await?;
    Ok(ApiResponse::paged(&uri, page))
}

/// GET /api/leave-management/leave-requests/my
pub async fn my_leaves(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<Leaves, ApiError> {
    let rows = state.leave.for_user(caller.id()).await?;
    Ok(leaves(&uri, rows))
}

/// GET /api/leave-management/leave-requests/range?startDate&endDate
pub async fn leaves_in_range(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> Result<Leaves, ApiError> {
    caller.require_cross_user(Module::Leave)?;
    let rows = state
        .leave
        .overlapping(&query.start_date, &query.end_date)
        .await?;
    Ok(leaves(&uri, rows))
}

/// GET /api/leave-management/leave-requests/balance
pub async fn balance(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<LeaveBalance>, ApiError> {
    let balance = state.leave.balance(caller.id()).await?;
    Ok(ApiResponse::ok(&uri, balance))
}

/// GET /api/leave-management/leave-requests/:id
pub async fn get_leave(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let leave = state.leave.get(&id).await?;
    caller.require_owner_or(&leave.user_id, Module::Leave, Action::Read)?;
    Ok(ApiResponse::ok(&uri, leave.into()))
}

/// PUT /api/leave-management/leave-requests/:id
pub async fn update_leave(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateLeaveRequest>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let current = state.leave.get(&id).await?;
    caller.require_owner_or(&current.user_id, Module::Leave, Action::Update)?;

    let (before, after) = state.leave.update(&id, &req).await?;
    let after = LeaveRequestResponse::from(after);
    audit_update(&state, &caller, before, &after).await;
    Ok(ApiResponse::ok(&uri, after))
}

async fn review(
    state: &AppState,
    caller: &AuthUser,
    id: &str,
    decision: LeaveDecision,
) -> Result<LeaveRequestResponse, ApiError> {
    match decision {
        LeaveDecision::Approved { .. } => caller.require(Module::Leave, Action::Approve)?,
        LeaveDecision::Rejected { .. } => caller.require(Module::Leave, Action::Reject)?,
    }
    let (before, after) = state.leave.decide(id, caller.id(), &decision).await?;
    let after = LeaveRequestResponse::from(after);
    audit_update(state, caller, before, &after).await;
    Ok(after)
}

/// PUT /api/leave-management/leave-requests/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(decision): ApiJson<LeaveDecision>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let leave = review(&state, &caller, &id, decision).await?;
    Ok(ApiResponse::ok(&uri, leave))
}

/// PUT /api/leave-management/leave-requests/:id/approve
pub async fn approve(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    body: Option<ApiJson<ApproveLeaveRequest>>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let notes = body.and_then(|ApiJson(b)| b.notes);
    let leave = review(&state, &caller, &id, LeaveDecision::Approved { notes }).await?;
    Ok(ApiResponse::ok(&uri, leave))
}

/// PUT /api/leave-management/leave-requests/:id/reject
pub async fn reject(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    body: Option<ApiJson<RejectLeaveRequest>>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let rejection_reason = body.and_then(|ApiJson(b)| b.rejection_reason);
    let leave = review(
        &state,
        &caller,
        &id,
        LeaveDecision::Rejected { rejection_reason },
    )
    .await?;
    Ok(ApiResponse::ok(&uri, leave))
}

/// PUT /api/leave-management/leave-requests/:id/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<LeaveRequestResponse>, ApiError> {
    let current = state.leave.get(&id).await?;
    caller.require_owner_or(&current.user_id, Module::Leave, Action::Update)?;

    let (before, after) = state.leave.cancel(&id).await?;
    let after = LeaveRequestResponse::from(after);
    audit_update(&state, &caller, before, &after).await;
    Ok(ApiResponse::ok(&uri, after))
}
