//! Authentication: login sessions, access tokens and the request guard.
//!
//! An access token is an HS256 JWT naming its login session (`sid`). The
//! session row stores the SHA-256 of the token and must stay active and
//! unexpired for the token to be accepted, so logout takes effect at once.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, OriginalUri, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::audit::{audit_log, extract_client_ip, snapshot};
use super::error::ApiError;
use super::extract::ApiJson;
use super::response::ApiResponse;
use super::users::{insert_user, load_role, NewUser};
use super::validation::validate_register;
use crate::crypto::{hash_token, verify_password};
use crate::db::{
    actions, entity_types, modules, Action, LoginRequest, LoginResponse, LoginUser, Module,
    RegisterRequest, Role, Session, SessionResponse, User, UserResponse, USER_ROLE,
};
use crate::AppState;

/// Access-token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    /// Role id at issue time
    pub role: Option<String>,
    /// Login session id
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing and verification keys built once from config
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(
        &self,
        user: &User,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role_id.clone(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Signature check, with expiry judged against `now`
    pub fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.exp <= now.timestamp() {
            return Err(ErrorKind::ExpiredSignature.into());
        }
        Ok(claims)
    }
}

fn stamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The authenticated caller, resolved by `auth_middleware`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub role: Option<Role>,
    pub session_id: String,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    /// Users without a role hold no permissions
    pub fn can(&self, module: Module, action: Action) -> bool {
        self.role
            .as_ref()
            .map(|role| role.is_active && role.has_permission(module, action))
            .unwrap_or(false)
    }

    pub fn require(&self, module: Module, action: Action) -> Result<(), ApiError> {
        if self.can(module, action) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Missing permission {}:{}",
                module, action
            )))
        }
    }

    /// Listing other users' records needs `<module>:list` and `users:list`
    pub fn require_cross_user(&self, module: Module) -> Result<(), ApiError> {
        self.require(module, Action::List)?;
        self.require(Module::Users, Action::List)
    }

    /// Pass when the caller is `owner_id` or holds the permission
    pub fn require_owner_or(
        &self,
        owner_id: &str,
        module: Module,
        action: Action,
    ) -> Result<(), ApiError> {
        if self.user.id == owner_id {
            Ok(())
        } else {
            self.require(module, action)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get("Authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Resolve a bearer token to its caller
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = state
        .jwt
        .verify(token, state.now())
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    let now = state.now_stamp();
    let session: Option<Session> = sqlx::query_as(
        r#"
        SELECT * FROM sessions
        WHERE id = ? AND token_hash = ? AND is_active = 1 AND expires_at > ?
        "#,
    )
    .bind(&claims.sid)
    .bind(hash_token(token))
    .bind(&now)
    .fetch_optional(&state.db)
    .await?;
    let session = session.ok_or_else(|| ApiError::unauthorized("Session expired or revoked"))?;

    sqlx::query("UPDATE sessions SET last_activity = ? WHERE id = ?")
        .bind(&now)
        .bind(&session.id)
        .execute(&state.db)
        .await?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(&state.db)
        .await?;
    let user = match user {
        Some(user) if user.is_active => user,
        _ => return Err(ApiError::unauthorized("User not found or inactive")),
    };

    let role = load_role(&state.db, user.role_id.as_deref()).await?;

    Ok(AuthUser {
        user,
        role,
        session_id: session.id,
    })
}

/// Rejects requests without a valid bearer token
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?
        .to_string();

    let caller = authenticate(&state, &token).await?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

/// Create a login session for `user` and sign its access token
pub async fn open_session(
    state: &AppState,
    user: &User,
    device_info: Option<&str>,
    ip_address: Option<&str>,
) -> Result<String, ApiError> {
    let now = state.now();

    // Expired sessions are dropped on every login
    let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(stamp(now))
        .execute(&state.db)
        .await?;
    if purged.rows_affected() > 0 {
        tracing::debug!(count = purged.rows_affected(), "Purged expired sessions");
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let token = state.jwt.issue(user, &session_id, now).map_err(|e| {
        tracing::error!(error = %e, "Failed to sign access token");
        ApiError::internal("Failed to create session")
    })?;
    let expires_at = now + Duration::days(state.config.auth.session_ttl_days);

    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, token_hash, device_info, ip_address, is_active,
                              last_activity, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(&session_id)
    .bind(&user.id)
    .bind(hash_token(&token))
    .bind(device_info)
    .bind(ip_address)
    .bind(stamp(now))
    .bind(stamp(expires_at))
    .bind(stamp(now))
    .execute(&state.db)
    .await?;

    Ok(token)
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    let email = request.email.trim().to_lowercase();
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            tracing::info!(email = %email, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };
    if !user.is_active {
        return Err(ApiError::unauthorized("Account is inactive"));
    }

    let device_info = headers.get("user-agent").and_then(|h| h.to_str().ok());
    let ip_address = extract_client_ip(&headers, None);
    let access_token = open_session(&state, &user, device_info, ip_address.as_deref()).await?;

    let role = load_role(&state.db, user.role_id.as_deref()).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(ApiResponse::ok(
        &uri,
        LoginResponse {
            access_token,
            user: LoginUser::new(&user, role.as_ref()),
        },
    ))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    validate_register(&request).finish()?;

    let role_id: Option<(String,)> = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
        .bind(USER_ROLE)
        .fetch_optional(&state.db)
        .await?;

    let user = insert_user(
        &state,
        NewUser {
            email: &request.email,
            password: &request.password,
            first_name: &request.first_name,
            last_name: &request.last_name,
            role_id: role_id.map(|(id,)| id),
            is_active: true,
            profile: &request.profile,
        },
    )
    .await?;
    let role = load_role(&state.db, user.role_id.as_deref()).await?;
    let response = UserResponse::from(user.clone()).with_role(role.as_ref());

    audit_log(
        &state,
        &user,
        modules::USERS,
        actions::CREATE,
        entity_types::USER,
        &user.id,
        None,
        snapshot(&response),
    )
    .await;

    tracing::info!(user_id = %user.id, "User registered");
    Ok(ApiResponse::created(&uri, response))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub sessions: u64,
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<LogoutResponse>, ApiError> {
    let result = sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ?")
        .bind(&caller.session_id)
        .execute(&state.db)
        .await?;
    tracing::info!(user_id = %caller.id(), "User logged out");
    Ok(ApiResponse::ok(
        &uri,
        LogoutResponse {
            sessions: result.rows_affected(),
        },
    ))
}

/// POST /api/auth/logout-all
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<LogoutResponse>, ApiError> {
    let result = sqlx::query("UPDATE sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1")
        .bind(caller.id())
        .execute(&state.db)
        .await?;
    tracing::info!(
        user_id = %caller.id(),
        sessions = result.rows_affected(),
        "User logged out of all sessions"
    );
    Ok(ApiResponse::ok(
        &uri,
        LogoutResponse {
            sessions: result.rows_affected(),
        },
    ))
}

/// GET /api/auth/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<Vec<SessionResponse>>, ApiError> {
    let sessions: Vec<Session> = sqlx::query_as(
        "SELECT * FROM sessions WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(caller.id())
    .fetch_all(&state.db)
    .await?;

    let sessions = sessions
        .into_iter()
        .map(|s| SessionResponse::from_session(s, &caller.session_id))
        .collect();
    Ok(ApiResponse::ok(&uri, sessions))
}

/// GET /api/auth/profile
pub async fn profile(
    OriginalUri(uri): OriginalUri,
    caller: AuthUser,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let AuthUser { user, role, .. } = caller;
    Ok(ApiResponse::ok(
        &uri,
        UserResponse::from(user).with_role(role.as_ref()),
    ))
}
