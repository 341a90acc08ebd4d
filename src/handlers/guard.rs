//! Gating rules for protected content.
//!
//! Requirements are checked in a fixed order and the first failure decides:
//!
//! 1. identity not loaded yet -> [`GuardDecision::Loading`]
//! 2. `require_auth` without an identity -> [`GuardDecision::RedirectToLogin`]
//! 3. role, 4. type, 5. permission, 6. branch -> [`GuardDecision::Denied`]
//! 7. otherwise [`GuardDecision::Allow`]

use crate::handlers::store::AuthSnapshot;
use crate::models::identity::{Permission, Role, UserType};

/// Where a branch id for a check comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSource {
    Fixed(String),
    /// A named segment of the matched route, e.g. `branch_id`.
    PathParam(String),
}

impl BranchSource {
    pub fn path(name: impl Into<String>) -> Self {
        BranchSource::PathParam(name.into())
    }

    fn resolve<F>(&self, path_param: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            BranchSource::Fixed(id) => Some(id.clone()),
            BranchSource::PathParam(name) => path_param(name.as_str()).filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Role,
    Type,
    Permission(Permission),
    Branch(String),
    /// The requirement names a path segment the route did not supply.
    MissingBranch,
}

impl Denial {
    pub fn message(&self) -> String {
        match self {
            Denial::Role => "Your role does not allow access to this page".to_string(),
            Denial::Type => "Your account type does not allow access to this page".to_string(),
            Denial::Permission(p) => format!("Missing permission {}", p),
            Denial::Branch(id) => format!("No access to branch {}", id),
            Denial::MissingBranch => "No branch specified".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    RedirectToLogin,
    Denied(Denial),
    Allow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardRequirements {
    require_auth: bool,
    roles: Vec<Role>,
    types: Vec<UserType>,
    permission: Option<(Permission, Option<BranchSource>)>,
    branch: Option<BranchSource>,
}

impl GuardRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    pub fn require_role(self, role: Role) -> Self {
        self.require_roles([role])
    }

    /// Passes when the identity holds any one of `roles`.
    pub fn require_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn require_type(self, user_type: UserType) -> Self {
        self.require_types([user_type])
    }

    pub fn require_types(mut self, types: impl IntoIterator<Item = UserType>) -> Self {
        self.types.extend(types);
        self
    }

    pub fn require_permission(mut self, permission: Permission, branch: Option<BranchSource>) -> Self {
        self.permission = Some((permission, branch));
        self
    }

    pub fn require_branch(mut self, branch: BranchSource) -> Self {
        self.branch = Some(branch);
        self
    }

    /// `snapshot` is `None` while the identity is still being loaded.
    pub fn evaluate<F>(&self, snapshot: Option<&AuthSnapshot>, path_param: F) -> GuardDecision
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(snapshot) = snapshot else {
            return GuardDecision::Loading;
        };
        if self.require_auth && !snapshot.is_authenticated() {
            return GuardDecision::RedirectToLogin;
        }

        let auth = snapshot.authorizer();
        if !self.roles.is_empty() && !auth.has_any_role(&self.roles) {
            return GuardDecision::Denied(Denial::Role);
        }
        if !self.types.is_empty() && !auth.has_any_type(&self.types) {
            return GuardDecision::Denied(Denial::Type);
        }
        if let Some((permission, source)) = &self.permission {
            let branch = match source {
                Some(source) => match source.resolve(&path_param) {
                    Some(id) => Some(id),
                    None => return GuardDecision::Denied(Denial::MissingBranch),
                },
                None => None,
            };
            if !auth.has_permission(*permission, branch.as_deref()) {
                return GuardDecision::Denied(Denial::Permission(*permission));
            }
        }
        if let Some(source) = &self.branch {
            let Some(branch) = source.resolve(&path_param) else {
                return GuardDecision::Denied(Denial::MissingBranch);
            };
            if !auth.can_access_branch(&branch) {
                return GuardDecision::Denied(Denial::Branch(branch));
            }
        }
        GuardDecision::Allow
    }
}
