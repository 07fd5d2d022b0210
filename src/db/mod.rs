mod models;
mod seeders;

pub use models::*;
pub use seeders::{
    ensure_admin_user, seed_system_roles, ADMIN_ROLE, MANAGER_ROLE, SUPER_ADMIN_ROLE, USER_ROLE,
};

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    // Comments may contain `;`, so drop them before splitting
    let cleaned: String = sql
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    for statement in cleaned.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("hrdesk.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied
pub async fn init_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Roles, users and login sessions
    execute_sql(pool, include_str!("../../migrations/001_users_roles.sql")).await?;

    // Migration 002: Attendance sessions
    execute_sql(pool, include_str!("../../migrations/002_attendance.sql")).await?;

    // Migration 003: Holidays and leave requests
    execute_sql(pool, include_str!("../../migrations/003_leave.sql")).await?;

    // Migration 004: Tours and their status history
    execute_sql(pool, include_str!("../../migrations/004_tours.sql")).await?;

    // Migration 005: Audit ledger
    execute_sql(pool, include_str!("../../migrations/005_audit_logs.sql")).await?;

    info!("Migrations completed");
    Ok(())
}

/// Whether a database error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Insert a bare active user with no role, returning its id
#[cfg(test)]
pub async fn insert_test_user(pool: &SqlitePool, email: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, first_name, last_name) VALUES (?, ?, 'x', 'Test', 'User')",
    )
    .bind(&id)
    .bind(email)
    .execute(pool)
    .await
    .expect("insert test user");
    id
}
