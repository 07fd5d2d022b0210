//! Database seeders for built-in data
//!
//! Seeds the four system roles and, when configured, a bootstrap super admin.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::models::{to_json_column, Action, Module, RolePermission};
use crate::config::AuthConfig;
use crate::crypto::hash_password;

pub const SUPER_ADMIN_ROLE: &str = "super_admin";
pub const ADMIN_ROLE: &str = "admin";
pub const MANAGER_ROLE: &str = "manager";
pub const USER_ROLE: &str = "user";

struct SystemRole {
    name: &'static str,
    display_name: &'static str,
    description: &'static str,
    is_super_admin: bool,
    permissions: Vec<RolePermission>,
}

fn system_roles() -> Vec<SystemRole> {
    use Action::*;
    use Module::*;

    vec![
        SystemRole {
            name: SUPER_ADMIN_ROLE,
            display_name: "Super Administrator",
            description: "Full system access with all permissions",
            is_super_admin: true,
            permissions: Module::ALL
                .iter()
                .map(|m| RolePermission::new(*m, &Action::ALL))
                .collect(),
        },
        SystemRole {
            name: ADMIN_ROLE,
            display_name: "Administrator",
            description: "Administrative access to most modules",
            is_super_admin: false,
            permissions: vec![
                RolePermission::new(Users, &[Create, Read, Update, List]),
                RolePermission::new(Attendance, &[Read, List, Export]),
                RolePermission::new(Leave, &[Read, List, Approve, Reject]),
                RolePermission::new(Holiday, &[Read, List]),
                RolePermission::new(Tour, &[Read, List, Approve, Reject]),
                RolePermission::new(Timelog, &[Read, List, Export]),
                RolePermission::new(Reports, &[Read, List, Export]),
            ],
        },
        SystemRole {
            name: MANAGER_ROLE,
            display_name: "Manager",
            description: "Team oversight with leave approval",
            is_super_admin: false,
            permissions: vec![
                RolePermission::new(Users, &[Read, List]),
                RolePermission::new(Attendance, &[Read, List]),
                RolePermission::new(Leave, &[Read, List, Approve, Reject]),
                RolePermission::new(Holiday, &[Read, List]),
                RolePermission::new(Tour, &[Read, List]),
                RolePermission::new(Timelog, &[Read, List]),
                RolePermission::new(Reports, &[Read, List]),
            ],
        },
        SystemRole {
            name: USER_ROLE,
            display_name: "User",
            description: "Regular employee access",
            is_super_admin: false,
            permissions: vec![
                RolePermission::new(Attendance, &[Create, Read, List]),
                RolePermission::new(Leave, &[Create, Read, List]),
                RolePermission::new(Tour, &[Create, Read, List]),
                RolePermission::new(Timelog, &[Create, Read, List]),
                RolePermission::new(Holiday, &[Read, List]),
            ],
        },
    ]
}

/// Seed the system roles (runs on every startup, existing rows are left alone)
pub async fn seed_system_roles(pool: &SqlitePool) -> Result<()> {
    info!("Seeding system roles...");

    let mut created = 0;
    for role in system_roles() {
        let result = sqlx::query(
            r#"
            INSERT INTO roles (id, name, display_name, description, is_super_admin, is_system_role, is_active, permissions)
            VALUES (?, ?, ?, ?, ?, 1, 1, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(role.name)
        .bind(role.display_name)
        .bind(role.description)
        .bind(role.is_super_admin)
        .bind(to_json_column(&role.permissions))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to seed role {}", role.name))?;
        created += result.rows_affected();
    }

    info!(created = created, "System roles seeded");
    Ok(())
}

/// Create the configured bootstrap super admin if it does not exist yet
pub async fn ensure_admin_user(pool: &SqlitePool, auth: &AuthConfig) -> Result<()> {
    let (email, password) = match (&auth.admin_email, &auth.admin_password) {
        (Some(email), Some(password)) => (email.trim().to_lowercase(), password),
        _ => return Ok(()),
    };

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;
    if exists.is_some() {
        return Ok(());
    }

    let role_id: (String,) = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
        .bind(SUPER_ADMIN_ROLE)
        .fetch_one(pool)
        .await
        .context("super_admin role missing; seed roles first")?;

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, role_id, is_active)
        VALUES (?, ?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&email)
    .bind(&password_hash)
    .bind(&auth.admin_first_name)
    .bind(&auth.admin_last_name)
    .bind(&role_id.0)
    .execute(pool)
    .await?;

    info!(email = %email, "Bootstrap super admin created");
    Ok(())
}
