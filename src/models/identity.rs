use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

//  ROLES & TYPES

#[derive(Debug, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Role {
    Customer,
    Staff,
    BranchManager,
    Admin,
    SuperAdmin,
}

/// How far a role reaches across branches.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BranchAccess {
    /// Every branch, including ones never referenced anywhere else.
    All,
    /// Only the branch the identity is affiliated with.
    Own,
    Denied,
}

impl Role {
    /// Branch reach per role. `admin` reaches every branch but, unlike
    /// `superAdmin`, still needs explicit grants for `has_permission`.
    pub fn branch_access(self) -> BranchAccess {
        match self {
            Role::SuperAdmin | Role::Admin => BranchAccess::All,
            Role::BranchManager | Role::Staff => BranchAccess::Own,
            Role::Customer => BranchAccess::Denied,
        }
    }

    /// Type assumed when a token carries a role but no type.
    pub fn default_type(self) -> UserType {
        match self {
            Role::Customer => UserType::User,
            Role::Staff => UserType::Staff,
            Role::BranchManager => UserType::Manager,
            Role::Admin | Role::SuperAdmin => UserType::Admin,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    User,
    Staff,
    Manager,
    Admin,
}

//  PERMISSIONS

#[derive(
    Debug, Serialize, Deserialize, Display, EnumString, EnumIter, PartialEq, Eq, Hash, PartialOrd, Ord, Clone,
    Copy,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ManageBranches,
    ManageFoods,
    ManageAccompaniments,
    ManageCategories,
    ManageUsers,
    ManagePermissions,
    ManageBranchOrders,
    ViewBranchOrders,
    ViewReports,
}

/// A single grant. Without a branch it is global for its permission,
/// with one it only applies to that branch.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub permission: Permission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

impl PermissionGrant {
    pub fn global(permission: Permission) -> Self {
        PermissionGrant {
            permission,
            branch_id: None,
        }
    }

    pub fn scoped(permission: Permission, branch_id: impl Into<String>) -> Self {
        PermissionGrant {
            permission,
            branch_id: Some(branch_id.into()),
        }
    }

    /// Exact match on the pair; a scoped grant never satisfies a global
    /// check and a global grant never satisfies a scoped one.
    pub fn matches(&self, permission: Permission, branch_id: Option<&str>) -> bool {
        self.permission == permission && self.branch_id.as_deref() == branch_id
    }
}

//  IDENTITY

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub issued_at: i64,
    pub expires_at: i64,
}

fn default_active() -> bool {
    true
}

impl Identity {
    /// Expiry is inclusive: a token whose `exp` equals `now` is already dead.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
