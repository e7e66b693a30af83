//! Storage traits for principals, roles and permissions
//!
//! Every lookup that takes `exclude_deleted` hides soft-deleted rows when it
//! is `true`; name/email lookups always hide them.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    ListQuery, NewPermission, NewRole, NewUser, Permission, PermissionUpdate, Result, Role,
    RoleUpdate, User, UserUpdate,
};

/// Principal store
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Lookup by id, with roles and their permissions loaded
    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Paged list of live users; `search` matches username or email
    async fn list(&self, query: &ListQuery) -> Result<Vec<User>>;

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>>;

    /// Soft delete; returns false when the user does not exist
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// Replace the user's role set
    async fn set_roles(&self, id: Uuid, role_ids: &[Uuid]) -> Result<()>;

    /// Connectivity probe for health checks
    async fn ping(&self) -> Result<()>;
}

/// Role store
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn create(&self, role: NewRole) -> Result<Role>;

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Role>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Role>>;

    async fn update(&self, id: Uuid, update: RoleUpdate) -> Result<Option<Role>>;

    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// Replace the role's permission set
    async fn set_permissions(&self, id: Uuid, permission_ids: &[Uuid]) -> Result<()>;

    /// Idempotent
    async fn add_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()>;

    /// Idempotent
    async fn remove_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()>;
}

/// Permission store
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn create(&self, permission: NewPermission) -> Result<Permission>;

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Permission>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>>;

    async fn find_by_resource_and_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Permission>>;

    async fn list_by_resource(&self, resource: &str) -> Result<Vec<Permission>>;

    async fn update(&self, id: Uuid, update: PermissionUpdate) -> Result<Option<Permission>>;

    async fn soft_delete(&self, id: Uuid) -> Result<bool>;
}

/// Bundle of store handles injected into services
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
}

impl Repositories {
    /// All three stores backed by one implementation
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository + RoleRepository + PermissionRepository + 'static,
    {
        Self {
            users: store.clone(),
            roles: store.clone(),
            permissions: store,
        }
    }
}
