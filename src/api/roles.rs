//! Role and permission management endpoints.

use axum::{
    extract::{OriginalUri, Path, State},
};
use std::sync::Arc;

use super::audit::{audit_log, snapshot};
use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::response::ApiResponse;
use super::validation::{validate_length, validate_role_name};
use crate::db::{
    actions, entity_types, modules, to_json_column, validate_permissions, Action,
    AssignPermissionsRequest, AvailablePermissions, CreateRoleRequest, Module, Role, RoleResponse,
    UpdateRoleRequest,
};
use crate::{AppState, DbPool};

async fn fetch_role(db: &DbPool, id: &str) -> Result<Role, ApiError> {
    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Role not found"))
}

/// POST /api/roles
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateRoleRequest>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Roles, Action::Create)?;

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_role_name(&req.name))
        .check(
            "displayName",
            validate_length("Display name", &req.display_name, 2, 100),
        );
    let permissions = match validate_permissions(&req.permissions) {
        Ok(permissions) => permissions,
        Err(message) => {
            errors.add("permissions", message);
            Vec::new()
        }
    };
    errors.finish()?;

    let name = req.name.trim().to_string();
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
        .bind(&name)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(format!(
            "Role with name '{}' already exists",
            name
        )));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = state.now_stamp();
    sqlx::query(
        r#"
        INSERT INTO roles (id, name, display_name, description, is_super_admin, is_system_role,
                           is_active, permissions, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, 1, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&name)
    .bind(req.display_name.trim())
    .bind(&req.description)
    .bind(req.is_super_admin)
    .bind(to_json_column(&permissions))
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let role = RoleResponse::from(fetch_role(&state.db, &id).await?);
    audit_log(
        &state,
        &caller.user,
        modules::ROLES,
        actions::CREATE,
        entity_types::ROLE,
        &id,
        None,
        snapshot(&role),
    )
    .await;

    tracing::info!(role = %name, "Role created");
    Ok(ApiResponse::created(&uri, role))
}

/// GET /api/roles
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<Vec<RoleResponse>>, ApiError> {
    caller.require(Module::Roles, Action::List)?;
    let roles: Vec<Role> = sqlx::query_as("SELECT * FROM roles ORDER BY created_at ASC, rowid ASC")
        .fetch_all(&state.db)
        .await?;
    Ok(ApiResponse::ok(
        &uri,
        roles.into_iter().map(RoleResponse::from).collect(),
    ))
}

/// GET /api/roles/available-permissions
pub async fn available_permissions(
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<AvailablePermissions>, ApiError> {
    caller.require(Module::Roles, Action::Read)?;
    Ok(ApiResponse::ok(&uri, AvailablePermissions::all()))
}

/// GET /api/roles/:id
pub async fn get_role(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Roles, Action::Read)?;
    let role = fetch_role(&state.db, &id).await?;
    Ok(ApiResponse::ok(&uri, role.into()))
}

/// GET /api/roles/name/:name
pub async fn get_role_by_name(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(name): Path<String>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Roles, Action::Read)?;
    let role: Role = sqlx::query_as("SELECT * FROM roles WHERE name = ?")
        .bind(&name)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Role '{}' not found", name)))?;
    Ok(ApiResponse::ok(&uri, role.into()))
}

/// PUT /api/roles/:id
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateRoleRequest>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Roles, Action::Update)?;
    let existing = fetch_role(&state.db, &id).await?;

    if existing.is_system_role && req.is_system_role == Some(false) {
        return Err(ApiError::bad_request(
            "Cannot remove system role flag from a system role",
        ));
    }
    if let Some(display_name) = &req.display_name {
        validate_length("Display name", display_name, 2, 100)
            .map_err(|e| ApiError::validation_field("displayName", e))?;
    }
    let permissions = match &req.permissions {
        Some(raw) => to_json_column(
            &validate_permissions(raw).map_err(|e| ApiError::validation_field("permissions", e))?,
        ),
        None => existing.permissions.clone(),
    };

    sqlx::query(
        r#"
        UPDATE roles
        SET display_name = ?, description = ?, is_super_admin = ?, is_system_role = ?,
            is_active = ?, permissions = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.display_name.as_deref().map(str::trim).unwrap_or(&existing.display_name))
    .bind(req.description.as_ref().or(existing.description.as_ref()))
    .bind(req.is_super_admin.unwrap_or(existing.is_super_admin))
    .bind(req.is_system_role.unwrap_or(existing.is_system_role))
    .bind(req.is_active.unwrap_or(existing.is_active))
    .bind(&permissions)
    .bind(state.now_stamp())
    .bind(&id)
    .execute(&state.db)
    .await?;

    let before = RoleResponse::from(existing);
    let after = RoleResponse::from(fetch_role(&state.db, &id).await?);
    audit_log(
        &state,
        &caller.user,
        modules::ROLES,
        actions::UPDATE,
        entity_types::ROLE,
        &id,
        snapshot(&before),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// PUT /api/roles/:id/permissions
///
/// Replaces the whole permission list.
pub async fn assign_permissions(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AssignPermissionsRequest>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Permissions, Action::Update)?;
    let existing = fetch_role(&state.db, &id).await?;
    let permissions = validate_permissions(&req.permissions)
        .map_err(|e| ApiError::validation_field("permissions", e))?;

    sqlx::query("UPDATE roles SET permissions = ?, updated_at = ? WHERE id = ?")
        .bind(to_json_column(&permissions))
        .bind(state.now_stamp())
        .bind(&id)
        .execute(&state.db)
        .await?;

    let before = RoleResponse::from(existing);
    let after = RoleResponse::from(fetch_role(&state.db, &id).await?);
    audit_log(
        &state,
        &caller.user,
        modules::ROLES,
        actions::UPDATE,
        entity_types::ROLE,
        &id,
        snapshot(&before),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// DELETE /api/roles/:id
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<RoleResponse>, ApiError> {
    caller.require(Module::Roles, Action::Delete)?;
    let existing = fetch_role(&state.db, &id).await?;
    if existing.is_system_role {
        return Err(ApiError::bad_request("System roles cannot be deleted"));
    }

    let assigned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    if assigned > 0 {
        return Err(ApiError::conflict(format!(
            "Role is assigned to {} user(s)",
            assigned
        )));
    }

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    let before = RoleResponse::from(existing);
    audit_log(
        &state,
        &caller.user,
        modules::ROLES,
        actions::DELETE,
        entity_types::ROLE,
        &id,
        snapshot(&before),
        None,
    )
    .await;

    tracing::info!(role = %before.name, "Role deleted");
    Ok(ApiResponse::ok(&uri, before))
}
