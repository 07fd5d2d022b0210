//! User management endpoints.

use axum::{
    extract::{OriginalUri, Path, Query, State},
};
use std::sync::Arc;

use super::audit::{audit_log, snapshot};
use super::auth::AuthUser;
use super::error::ApiError;
use super::extract::ApiJson;
use super::response::ApiResponse;
use super::validation::{validate_create_user, validate_update_user};
use crate::crypto::hash_password;
use crate::db::{
    actions, entity_types, modules, Action, CreateUserRequest, Module, Page, PaginationParams,
    Role, UpdateUserRequest, User, UserProfileFields, UserQuery, UserResponse,
};
use crate::{AppState, DbPool};

/// Fields of a user about to be inserted
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role_id: Option<String>,
    pub is_active: bool,
    pub profile: &'a UserProfileFields,
}

/// Role by id; `None` for role-less users
pub async fn load_role(db: &DbPool, role_id: Option<&str>) -> Result<Option<Role>, sqlx::Error> {
    match role_id {
        Some(id) => {
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = ?")
                .bind(id)
                .fetch_optional(db)
                .await
        }
        None => Ok(None),
    }
}

async fn ensure_role_exists(db: &DbPool, role_id: &str) -> Result<(), ApiError> {
    match load_role(db, Some(role_id)).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::validation_field("roleId", "Role not found")),
    }
}

async fn fetch_user(db: &DbPool, id: &str) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn user_response(db: &DbPool, user: User) -> Result<UserResponse, ApiError> {
    let role = load_role(db, user.role_id.as_deref()).await?;
    Ok(UserResponse::from(user).with_role(role.as_ref()))
}

/// Hash the password and insert; duplicate email is a 409
pub async fn insert_user(state: &AppState, new: NewUser<'_>) -> Result<User, ApiError> {
    let db = &state.db;
    let email = new.email.trim().to_lowercase();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("A user with this email already exists"));
    }

    let password_hash = hash_password(new.password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to create user")
    })?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = state.now_stamp();
    let profile = new.profile;

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, mobile_number,
                           address_line1, address_line2, city, state, center, pincode, designation,
                           role_id, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&email)
    .bind(&password_hash)
    .bind(new.first_name.trim())
    .bind(new.last_name.trim())
    .bind(profile.mobile_number.as_deref().unwrap_or_default())
    .bind(&profile.address_line1)
    .bind(&profile.address_line2)
    .bind(&profile.city)
    .bind(&profile.state)
    .bind(&profile.center)
    .bind(&profile.pincode)
    .bind(&profile.designation)
    .bind(&new.role_id)
    .bind(new.is_active)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    fetch_user(db, &id).await
}

/// POST /api/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    caller.require(Module::Users, Action::Create)?;
    validate_create_user(&req).finish()?;
    if let Some(role_id) = &req.role_id {
        ensure_role_exists(&state.db, role_id).await?;
    }

    let user = insert_user(
        &state,
        NewUser {
            email: &req.email,
            password: &req.password,
            first_name: &req.first_name,
            last_name: &req.last_name,
            role_id: req.role_id.clone(),
            is_active: req.is_active.unwrap_or(true),
            profile: &req.profile,
        },
    )
    .await?;
    let response = user_response(&state.db, user).await?;

    audit_log(
        &state,
        &caller.user,
        modules::USERS,
        actions::CREATE,
        entity_types::USER,
        &response.id,
        None,
        snapshot(&response),
    )
    .await;

    tracing::info!(user_id = %response.id, created_by = %caller.id(), "User created");
    Ok(ApiResponse::created(&uri, response))
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Query(query): Query<UserQuery>,
) -> Result<ApiResponse<Vec<UserResponse>>, ApiError> {
    caller.require(Module::Users, Action::List)?;

    let params = PaginationParams {
        page: query.page,
        limit: query.limit,
    };
    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("(first_name LIKE ? OR last_name LIKE ? OR email LIKE ?)");
        let pattern = format!("%{}%", search);
        bindings.extend(std::iter::repeat(pattern).take(3));
    }
    if let Some(is_active) = query.is_active {
        conditions.push(if is_active { "is_active = 1" } else { "is_active = 0" });
    }
    if let Some(role_id) = &query.role_id {
        conditions.push("role_id = ?");
        bindings.push(role_id.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM users {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(&state.db).await?;

    let sql = format!(
        "SELECT * FROM users {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, User>(&sql);
    for binding in &bindings {
        list_query = list_query.bind(binding);
    }
    let users = list_query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&state.db)
        .await?;

    let roles: Vec<Role> = sqlx::query_as("SELECT * FROM roles")
        .fetch_all(&state.db)
        .await?;
    let items = users
        .into_iter()
        .map(|user| {
            let role = roles.iter().find(|r| Some(&r.id) == user.role_id.as_ref());
            UserResponse::from(user).with_role(role)
        })
        .collect();

    Ok(ApiResponse::<Vec<UserResponse>>::paged(
        &uri,
        Page {
            items,
            pagination: params.into_pagination(total),
        },
    ))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    caller.require_owner_or(&id, Module::Users, Action::Read)?;
    let user = fetch_user(&state.db, &id).await?;
    Ok(ApiResponse::ok(&uri, user_response(&state.db, user).await?))
}

/// PUT /api/users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    // Self-service edits may not touch role or activation
    if caller.id() != id || req.touches_admin_fields() {
        caller.require(Module::Users, Action::Update)?;
    }
    validate_update_user(&req).finish()?;

    let existing = fetch_user(&state.db, &id).await?;
    let before = user_response(&state.db, existing.clone()).await?;

    let email = match &req.email {
        Some(email) => {
            let email = email.trim().to_lowercase();
            let taken: Option<(String,)> =
                sqlx::query_as("SELECT id FROM users WHERE email = ? AND id != ?")
                    .bind(&email)
                    .bind(&id)
                    .fetch_optional(&state.db)
                    .await?;
            if taken.is_some() {
                return Err(ApiError::conflict("A user with this email already exists"));
            }
            email
        }
        None => existing.email.clone(),
    };
    let password_hash = match &req.password {
        Some(password) => hash_password(password).map_err(|e| {
            tracing::error!(error = %e, "Failed to hash password");
            ApiError::internal("Failed to update user")
        })?,
        None => existing.password_hash.clone(),
    };
    if let Some(role_id) = &req.role_id {
        ensure_role_exists(&state.db, role_id).await?;
    }

    let profile = &req.profile;
    let pick = |new: &Option<String>, old: &Option<String>| new.clone().or_else(|| old.clone());

    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = ?, first_name = ?, last_name = ?, mobile_number = ?,
            address_line1 = ?, address_line2 = ?, city = ?, state = ?, center = ?, pincode = ?,
            designation = ?, role_id = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(req.first_name.as_deref().map(str::trim).unwrap_or(&existing.first_name))
    .bind(req.last_name.as_deref().map(str::trim).unwrap_or(&existing.last_name))
    .bind(profile.mobile_number.as_ref().unwrap_or(&existing.mobile_number))
    .bind(pick(&profile.address_line1, &existing.address_line1))
    .bind(pick(&profile.address_line2, &existing.address_line2))
    .bind(pick(&profile.city, &existing.city))
    .bind(pick(&profile.state, &existing.state))
    .bind(pick(&profile.center, &existing.center))
    .bind(pick(&profile.pincode, &existing.pincode))
    .bind(pick(&profile.designation, &existing.designation))
    .bind(pick(&req.role_id, &existing.role_id))
    .bind(req.is_active.unwrap_or(existing.is_active))
    .bind(state.now_stamp())
    .bind(&id)
    .execute(&state.db)
    .await?;

    let updated = fetch_user(&state.db, &id).await?;
    let after = user_response(&state.db, updated).await?;

    audit_log(
        &state,
        &caller.user,
        modules::USERS,
        actions::UPDATE,
        entity_types::USER,
        &id,
        snapshot(&before),
        snapshot(&after),
    )
    .await;

    Ok(ApiResponse::ok(&uri, after))
}

/// DELETE /api/users/:id
///
/// Sessions, attendance and leave requests of the user cascade; tours stay.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    caller.require(Module::Users, Action::Delete)?;
    if caller.id() == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let existing = fetch_user(&state.db, &id).await?;
    let before = user_response(&state.db, existing).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        &caller.user,
        modules::USERS,
        actions::DELETE,
        entity_types::USER,
        &id,
        snapshot(&before),
        None,
    )
    .await;

    tracing::info!(user_id = %id, deleted_by = %caller.id(), "User deleted");
    Ok(ApiResponse::ok(&uri, before))
}
