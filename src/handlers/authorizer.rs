use crate::models::identity::{BranchAccess, Identity, Permission, Role, UserType};
use std::str::FromStr;
use strum::IntoEnumIterator;

/// Anything that names a role: the enum itself or its wire string.
pub trait AsRole {
    fn as_role(&self) -> Option<Role>;
}

impl AsRole for Role {
    fn as_role(&self) -> Option<Role> {
        Some(*self)
    }
}

impl AsRole for &str {
    fn as_role(&self) -> Option<Role> {
        Role::from_str(self.trim()).ok()
    }
}

impl AsRole for String {
    fn as_role(&self) -> Option<Role> {
        self.as_str().as_role()
    }
}

/// Anything that names a user type: the enum itself or its wire string.
pub trait AsUserType {
    fn as_user_type(&self) -> Option<UserType>;
}

impl AsUserType for UserType {
    fn as_user_type(&self) -> Option<UserType> {
        Some(*self)
    }
}

impl AsUserType for &str {
    fn as_user_type(&self) -> Option<UserType> {
        UserType::from_str(self.trim()).ok()
    }
}

impl AsUserType for String {
    fn as_user_type(&self) -> Option<UserType> {
        self.as_str().as_user_type()
    }
}

/// Permission decisions over one identity snapshot. Every method is pure and
/// answers `false` when there is no identity.
#[derive(Debug, Clone, Copy)]
pub struct Authorizer<'a> {
    identity: Option<&'a Identity>,
}

impl<'a> Authorizer<'a> {
    pub fn new(identity: Option<&'a Identity>) -> Self {
        Authorizer { identity }
    }

    pub fn identity(&self) -> Option<&'a Identity> {
        self.identity
    }

    /// `superAdmin` passes every check. Everyone else needs a grant whose
    /// branch scope matches `branch_id` exactly (`None` means a global grant).
    pub fn has_permission(&self, permission: Permission, branch_id: Option<&str>) -> bool {
        let Some(identity) = self.identity else {
            return false;
        };
        if identity.role == Role::SuperAdmin {
            return true;
        }
        identity
            .permissions
            .iter()
            .any(|grant| grant.matches(permission, branch_id))
    }

    pub fn is_role<R: AsRole>(&self, role: R) -> bool {
        match (self.identity, role.as_role()) {
            (Some(identity), Some(role)) => identity.role == role,
            _ => false,
        }
    }

    pub fn is_type<T: AsUserType>(&self, user_type: T) -> bool {
        match (self.identity, user_type.as_user_type()) {
            (Some(identity), Some(user_type)) => identity.user_type == user_type,
            _ => false,
        }
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.is_role(*role))
    }

    pub fn has_any_type(&self, types: &[UserType]) -> bool {
        types.iter().any(|user_type| self.is_type(*user_type))
    }

    pub fn can_access_branch(&self, branch_id: &str) -> bool {
        let Some(identity) = self.identity else {
            return false;
        };
        match identity.role.branch_access() {
            BranchAccess::All => true,
            BranchAccess::Own => identity.branch_id.as_deref() == Some(branch_id),
            BranchAccess::Denied => false,
        }
    }

    /// Permissions that pass a scoped check for `branch_id`.
    pub fn branch_permissions(&self, branch_id: &str) -> Vec<Permission> {
        Permission::iter()
            .filter(|permission| self.has_permission(*permission, Some(branch_id)))
            .collect()
    }
}
