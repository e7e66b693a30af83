//! Productivity Tracker core - domain models, errors and shared traits
//!
//! This crate defines the abstractions the HTTP service is built on:
//! - Principal, role and permission models
//! - The structured application error taxonomy
//! - Permission resolution (pure functions)
//! - Repository traits and their PostgreSQL implementation
//! - Configuration management

pub mod config;
pub mod error;
pub mod postgres;
pub mod rbac;
pub mod repository;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use config::{AppConfig, AuthConfig, ConfigError, CookieConfig, JwtAlgorithm, SameSitePolicy};
pub use error::{AppError, ErrorKind, Result};
pub use postgres::PgStore;
pub use rbac::{AccessProfile, RoleGrant};
pub use repository::{PermissionRepository, Repositories, RoleRepository, UserRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Permissions
// ============================================================================

/// A named capability on a resource, e.g. `users:read`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,

    /// Unique name, conventionally `resource:action`
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

impl NewPermission {
    pub fn new(resource: &str, action: &str, description: Option<&str>) -> Self {
        Self {
            name: format!("{resource}:{action}"),
            resource: resource.to_string(),
            action: action.to_string(),
            description: description.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

// ============================================================================
// Roles
// ============================================================================

/// A named bundle of permissions
///
/// The permission list is read live on every load, so changing a role's
/// permissions is visible to every holder on their next request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn permission_names(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(|p| p.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

// ============================================================================
// Users (principals)
// ============================================================================

/// An identity that can authenticate and hold roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub roles: Vec<Role>,
}

impl User {
    /// Snapshot of the data the permission resolver needs
    pub fn access_profile(&self) -> AccessProfile {
        AccessProfile::from(self)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub username: Option<String>,
    pub hashed_password: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.hashed_password.is_none()
            && self.is_active.is_none()
    }
}

/// Paging and optional free-text filter for list queries
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub skip: i64,
    pub limit: i64,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            search: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "alice@x.com".to_string(),
            username: "alice".to_string(),
            hashed_password: "$argon2id$secret".to_string(),
            is_active: true,
            is_superuser: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            roles: vec![],
        }
    }

    #[test]
    fn test_user_serialization_hides_password_hash() {
        let json = serde_json::to_value(sample_user()).unwrap();
        assert!(json.get("hashed_password").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn test_new_permission_name() {
        let p = NewPermission::new("tasks", "create", Some("Create tasks"));
        assert_eq!(p.name, "tasks:create");
        assert_eq!(p.resource, "tasks");
    }

    #[test]
    fn test_user_update_is_empty() {
        assert!(UserUpdate::default().is_empty());
        let update = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
