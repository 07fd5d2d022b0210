//! Role and permission models.
//!
//! A role embeds a list of `{module, actions}` entries. Modules and actions
//! are closed enumerations; anything else is rejected when a role is written.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_json_column;

/// Functional areas guarded by the permission model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Users,
    Roles,
    Permissions,
    Attendance,
    Leave,
    Holiday,
    Tour,
    Timelog,
    Reports,
}

impl Module {
    pub const ALL: [Module; 9] = [
        Module::Users,
        Module::Roles,
        Module::Permissions,
        Module::Attendance,
        Module::Leave,
        Module::Holiday,
        Module::Tour,
        Module::Timelog,
        Module::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Users => "users",
            Module::Roles => "roles",
            Module::Permissions => "permissions",
            Module::Attendance => "attendance",
            Module::Leave => "leave",
            Module::Holiday => "holiday",
            Module::Tour => "tour",
            Module::Timelog => "timelog",
            Module::Reports => "reports",
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Invalid module: {}", s))
    }
}

/// Operation verbs within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    List,
    Approve,
    Reject,
    Export,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::List,
        Action::Approve,
        Action::Reject,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Export => "export",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Invalid action: {}", s))
    }
}

/// A validated permission entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub module: Module,
    pub actions: Vec<Action>,
}

impl RolePermission {
    pub fn new(module: Module, actions: &[Action]) -> Self {
        Self {
            module,
            actions: actions.to_vec(),
        }
    }
}

/// Permission entry as supplied by a client, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawPermission {
    pub module: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Validate a whole permission list. Either every entry is valid or the
/// write is refused; nothing is partially applied.
pub fn validate_permissions(raw: &[RawPermission]) -> Result<Vec<RolePermission>, String> {
    let mut validated = Vec::with_capacity(raw.len());
    for entry in raw {
        let module: Module = entry.module.parse()?;
        if entry.actions.is_empty() {
            return Err(format!(
                "Actions must be a non-empty array for module: {}",
                entry.module
            ));
        }
        let mut actions = Vec::with_capacity(entry.actions.len());
        for action in &entry.actions {
            let action: Action = action
                .parse()
                .map_err(|_| format!("Invalid action: {} for module: {}", action, entry.module))?;
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        validated.push(RolePermission { module, actions });
    }
    Ok(validated)
}

/// Pure allow/deny evaluation over a role's flags and permission list
pub fn has_permission(
    is_super_admin: bool,
    permissions: &[RolePermission],
    module: Module,
    action: Action,
) -> bool {
    if is_super_admin {
        return true;
    }
    permissions
        .iter()
        .find(|p| p.module == module)
        .map(|p| p.actions.contains(&action))
        .unwrap_or(false)
}

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_super_admin: bool,
    pub is_system_role: bool,
    pub is_active: bool,
    /// JSON-encoded `Vec<RolePermission>`
    pub permissions: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Role {
    pub fn permission_list(&self) -> Vec<RolePermission> {
        parse_json_column(&self.permissions)
    }

    pub fn has_permission(&self, module: Module, action: Action) -> bool {
        has_permission(self.is_super_admin, &self.permission_list(), module, action)
    }
}

/// Role as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_super_admin: bool,
    pub is_system_role: bool,
    pub is_active: bool,
    pub permissions: Vec<RolePermission>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        let permissions = role.permission_list();
        Self {
            id: role.id,
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            is_super_admin: role.is_super_admin,
            is_system_role: role.is_system_role,
            is_active: role.is_active,
            permissions,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

/// Compact role description embedded in user and login responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSummary {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub is_super_admin: bool,
}

impl From<&Role> for RoleSummary {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id.clone(),
            name: role.name.clone(),
            display_name: role.display_name.clone(),
            is_super_admin: role.is_super_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub permissions: Vec<RawPermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_super_admin: Option<bool>,
    pub is_system_role: Option<bool>,
    pub is_active: Option<bool>,
    pub permissions: Option<Vec<RawPermission>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignPermissionsRequest {
    pub permissions: Vec<RawPermission>,
}

/// Modules and actions a role can reference
#[derive(Debug, Serialize)]
pub struct AvailablePermissions {
    pub modules: Vec<Module>,
    pub actions: Vec<Action>,
}

impl AvailablePermissions {
    pub fn all() -> Self {
        Self {
            modules: Module::ALL.to_vec(),
            actions: Action::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(module: &str, actions: &[&str]) -> RawPermission {
        RawPermission {
            module: module.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_super_admin_bypasses_everything() {
        for module in Module::ALL {
            for action in Action::ALL {
                assert!(has_permission(true, &[], module, action));
            }
        }
    }

    #[test]
    fn test_permission_lookup() {
        let perms = vec![RolePermission::new(Module::Leave, &[Action::Read])];
        assert!(has_permission(false, &perms, Module::Leave, Action::Read));
        assert!(!has_permission(false, &perms, Module::Leave, Action::Approve));
        assert!(!has_permission(false, &perms, Module::Attendance, Action::Read));
    }

    #[test]
    fn test_validate_rejects_unknown_module() {
        let err = validate_permissions(&[raw("leave", &["read"]), raw("payroll", &["read"])])
            .unwrap_err();
        assert_eq!(err, "Invalid module: payroll");
    }

    #[test]
    fn test_validate_rejects_unknown_action() {
        let err = validate_permissions(&[raw("tour", &["read", "teleport"])]).unwrap_err();
        assert!(err.contains("Invalid action: teleport"));
    }

    #[test]
    fn test_validate_rejects_empty_actions() {
        assert!(validate_permissions(&[raw("tour", &[])]).is_err());
    }

    #[test]
    fn test_validate_dedupes_actions() {
        let perms = validate_permissions(&[raw("tour", &["read", "read", "list"])]).unwrap();
        assert_eq!(perms[0].actions, vec![Action::Read, Action::List]);
    }

    #[test]
    fn test_role_reads_json_permissions() {
        let role = Role {
            id: "r1".to_string(),
            name: "auditor".to_string(),
            display_name: "Auditor".to_string(),
            description: None,
            is_super_admin: false,
            is_system_role: false,
            is_active: true,
            permissions: r#"[{"module":"reports","actions":["read","export"]}]"#.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(role.has_permission(Module::Reports, Action::Export));
        assert!(!role.has_permission(Module::Reports, Action::Delete));
    }
}
