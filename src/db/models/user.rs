//! User and login session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::role::{Role, RolePermission, RoleSummary};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub mobile_number: String,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub center: Option<String>,
    pub pincode: Option<String>,
    pub designation: Option<String>,
    pub role_id: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// User as returned by the API (never carries the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub mobile_number: String,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub center: Option<String>,
    pub pincode: Option<String>,
    pub designation: Option<String>,
    pub role_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleSummary>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl UserResponse {
    pub fn with_role(mut self, role: Option<&Role>) -> Self {
        self.role = role.map(RoleSummary::from);
        self
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            mobile_number: user.mobile_number,
            address_line1: user.address_line1,
            address_line2: user.address_line2,
            city: user.city,
            state: user.state,
            center: user.center,
            pincode: user.pincode,
            designation: user.designation,
            role_id: user.role_id,
            role: None,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Login session row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub is_active: bool,
    pub last_activity: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub is_active: bool,
    pub is_current: bool,
    pub last_activity: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

impl SessionResponse {
    pub fn from_session(session: Session, current_session_id: &str) -> Self {
        Self {
            is_current: session.id == current_session_id,
            id: session.id,
            device_info: session.device_info,
            ip_address: session.ip_address,
            is_active: session.is_active,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<RoleSummary>,
    pub permissions: Vec<RolePermission>,
    pub is_super_admin: bool,
}

impl LoginUser {
    pub fn new(user: &User, role: Option<&Role>) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: role.map(RoleSummary::from),
            permissions: role.map(|r| r.permission_list()).unwrap_or_default(),
            is_super_admin: role.map(|r| r.is_super_admin).unwrap_or(false),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: LoginUser,
}

/// Fields shared by self-registration and admin creation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileFields {
    pub mobile_number: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub center: Option<String>,
    pub pincode: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub profile: UserProfileFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role_id: Option<String>,
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub profile: UserProfileFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<String>,
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub profile: UserProfileFields,
}

impl UpdateUserRequest {
    /// Whether the request touches fields only an administrator may change
    pub fn touches_admin_fields(&self) -> bool {
        self.role_id.is_some() || self.is_active.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub role_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
