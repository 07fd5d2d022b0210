//! Audit ledger models. Entries are written once and never updated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use super::common::{parse_json_column, to_json_column, Page, PaginationParams};

/// Audit log row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub module: String,
    pub action: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub performed_by: String,
    pub performed_by_email: Option<String>,
    /// JSON-encoded `Vec<FieldChange>`
    pub changes: String,
    /// JSON-encoded object
    pub metadata: String,
    pub created_at: String,
}

/// One changed field between two representations of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogResponse {
    pub id: String,
    pub module: String,
    pub action: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub performed_by: String,
    pub performed_by_email: Option<String>,
    pub changes: Vec<FieldChange>,
    pub metadata: Value,
    pub created_at: String,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(log: AuditLog) -> Self {
        let changes = parse_json_column(&log.changes);
        let metadata = serde_json::from_str(&log.metadata).unwrap_or(Value::Object(Map::new()));
        Self {
            id: log.id,
            module: log.module,
            action: log.action,
            entity_id: log.entity_id,
            entity_type: log.entity_type,
            performed_by: log.performed_by,
            performed_by_email: log.performed_by_email,
            changes,
            metadata,
            created_at: log.created_at,
        }
    }
}

/// A new ledger entry
#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry<'a> {
    pub module: &'a str,
    pub action: &'a str,
    pub entity_id: Option<&'a str>,
    pub entity_type: Option<&'a str>,
    pub performed_by: &'a str,
    pub performed_by_email: Option<&'a str>,
    pub changes: Vec<FieldChange>,
    pub metadata: Option<Value>,
}

/// Query parameters for filtering audit logs
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub module: Option<String>,
    pub action: Option<String>,
    pub entity_id: Option<String>,
    pub performed_by: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Audited modules
pub mod modules {
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const HOLIDAY: &str = "holiday";
    pub const LEAVE: &str = "leave";
    pub const TOUR: &str = "tour";
    pub const ATTENDANCE: &str = "attendance";
}

/// Audited actions
pub mod actions {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// Entity type labels
pub mod entity_types {
    pub const USER: &str = "User";
    pub const ROLE: &str = "Role";
    pub const HOLIDAY: &str = "Holiday";
    pub const LEAVE_REQUEST: &str = "LeaveRequest";
    pub const TOUR: &str = "Tour";
    pub const ATTENDANCE: &str = "Attendance";
}

/// Fields never recorded in a diff
const IGNORED_FIELDS: &[&str] = &["password", "passwordHash", "password_hash"];

/// Shallow diff of two JSON objects. Nested values are compared as a whole.
pub fn compute_diff(old: Option<&Value>, new: Option<&Value>) -> Vec<FieldChange> {
    let empty = Map::new();
    let old_map = old.and_then(Value::as_object).unwrap_or(&empty);
    let new_map = new.and_then(Value::as_object).unwrap_or(&empty);

    let mut keys: Vec<&String> = old_map.keys().collect();
    for key in new_map.keys() {
        if !old_map.contains_key(key) {
            keys.push(key);
        }
    }

    keys.into_iter()
        .filter(|key| !IGNORED_FIELDS.contains(&key.as_str()))
        .filter_map(|key| {
            let before = old_map.get(key);
            let after = new_map.get(key);
            if before == after {
                None
            } else {
                Some(FieldChange {
                    field: key.clone(),
                    old_value: before.cloned(),
                    new_value: after.cloned(),
                })
            }
        })
        .collect()
}

/// Append an entry to the ledger
pub async fn log_audit(db: &SqlitePool, entry: NewAuditEntry<'_>) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let changes = to_json_column(&entry.changes);
    let metadata = entry
        .metadata
        .unwrap_or_else(|| Value::Object(Map::new()))
        .to_string();

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, module, action, entity_id, entity_type, performed_by, performed_by_email, changes, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(entry.module)
    .bind(entry.action)
    .bind(entry.entity_id)
    .bind(entry.entity_type)
    .bind(entry.performed_by)
    .bind(entry.performed_by_email)
    .bind(&changes)
    .bind(&metadata)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        module = entry.module,
        action = entry.action,
        entity_id = entry.entity_id,
        performed_by = entry.performed_by,
        "Audit log recorded"
    );

    Ok(())
}

/// List audit logs with filtering and pagination, newest first
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<Page<AuditLog>, sqlx::Error> {
    let params = PaginationParams {
        page: query.page,
        limit: query.limit,
    };

    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(module) = &query.module {
        conditions.push("module = ?");
        bindings.push(module.clone());
    }

    if let Some(action) = &query.action {
        conditions.push("action = ?");
        bindings.push(action.clone());
    }

    if let Some(entity_id) = &query.entity_id {
        conditions.push("entity_id = ?");
        bindings.push(entity_id.clone());
    }

    if let Some(performed_by) = &query.performed_by {
        conditions.push("performed_by = ?");
        bindings.push(performed_by.clone());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM audit_logs {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut query_builder = sqlx::query_as::<_, AuditLog>(&sql);
    for binding in &bindings {
        query_builder = query_builder.bind(binding);
    }
    query_builder = query_builder.bind(params.limit()).bind(params.offset());

    let items = query_builder.fetch_all(db).await?;

    Ok(Page {
        items,
        pagination: params.into_pagination(total),
    })
}
