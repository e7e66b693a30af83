//! Permission resolution
//!
//! Pure functions over an [`AccessProfile`]. A superuser passes every check;
//! otherwise permissions are the union across all held roles.

use serde::{Deserialize, Serialize};

use crate::User;

/// One role as seen by the resolver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub name: String,
    pub permissions: Vec<String>,
}

impl RoleGrant {
    pub fn new<I, S>(name: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Principal data needed to answer authorization questions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProfile {
    pub is_superuser: bool,
    pub roles: Vec<RoleGrant>,
}

impl From<&User> for AccessProfile {
    fn from(user: &User) -> Self {
        Self {
            is_superuser: user.is_superuser,
            roles: user
                .roles
                .iter()
                .filter(|role| !role.is_deleted)
                .map(|role| RoleGrant {
                    name: role.name.clone(),
                    permissions: role
                        .permissions
                        .iter()
                        .filter(|p| !p.is_deleted)
                        .map(|p| p.name.clone())
                        .collect(),
                })
                .collect(),
        }
    }
}

/// True when the principal holds `permission` through any role
pub fn has_permission(profile: &AccessProfile, permission: &str) -> bool {
    if profile.is_superuser {
        return true;
    }
    profile
        .roles
        .iter()
        .any(|role| role.permissions.iter().any(|p| p == permission))
}

/// True when at least one of `permissions` is granted
pub fn has_any_permission<S: AsRef<str>>(profile: &AccessProfile, permissions: &[S]) -> bool {
    if profile.is_superuser {
        return true;
    }
    permissions
        .iter()
        .any(|p| has_permission(profile, p.as_ref()))
}

/// True when every one of `permissions` is granted
pub fn has_all_permissions<S: AsRef<str>>(profile: &AccessProfile, permissions: &[S]) -> bool {
    if profile.is_superuser {
        return true;
    }
    permissions
        .iter()
        .all(|p| has_permission(profile, p.as_ref()))
}

pub fn has_role(profile: &AccessProfile, role_name: &str) -> bool {
    profile.is_superuser || profile.roles.iter().any(|role| role.name == role_name)
}
