//! In-memory repositories for tests
//!
//! Relations are stored by id and joined on read, so permission changes on a
//! role are visible through every user holding it. Unique columns reject
//! duplicates with the same error text PostgreSQL produces.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::repository::{PermissionRepository, RoleRepository, UserRepository};
use crate::{
    AppError, ListQuery, NewPermission, NewRole, NewUser, Permission, PermissionUpdate, Result,
    Role, RoleUpdate, User, UserUpdate,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    user_roles: HashMap<Uuid, Vec<Uuid>>,
    role_permissions: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn role_with_permissions(&self, role: &Role) -> Role {
        let mut role = role.clone();
        role.permissions = self
            .role_permissions
            .get(&role.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.permissions.get(id))
            .filter(|p| !p.is_deleted)
            .cloned()
            .collect();
        role.permissions.sort_by(|a, b| a.name.cmp(&b.name));
        role
    }

    fn user_with_roles(&self, user: &User) -> User {
        let mut user = user.clone();
        user.roles = self
            .user_roles
            .get(&user.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.roles.get(id))
            .filter(|r| !r.is_deleted)
            .map(|r| self.role_with_permissions(r))
            .collect();
        user.roles.sort_by(|a, b| a.name.cmp(&b.name));
        user
    }
}

fn unique_violation(constraint: &str) -> AppError {
    AppError::database(
        "unique constraint violated",
        format!("duplicate key value violates unique constraint \"{constraint}\""),
    )
}

fn page<T>(items: Vec<T>, query: &ListQuery) -> Vec<T> {
    items
        .into_iter()
        .skip(query.skip.max(0) as usize)
        .take(query.limit.max(0) as usize)
        .collect()
}

fn matches_search(query: &ListQuery, fields: &[&str]) -> bool {
    match query.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => {
            let term = term.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&term))
        }
        _ => true,
    }
}

/// Thread-safe in-memory implementation of all repositories
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self
            .tables
            .read()
            .map_err(|_| AppError::internal("memory store lock poisoned"))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| AppError::internal("memory store lock poisoned"))?;
        f(&mut tables)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User> {
        self.write(|t| {
            if t.users.values().any(|u| u.email == user.email) {
                return Err(unique_violation("users_email_key"));
            }
            if t.users.values().any(|u| u.username == user.username) {
                return Err(unique_violation("users_username_key"));
            }

            let now = Utc::now();
            let record = User {
                id: Uuid::new_v4(),
                email: user.email,
                username: user.username,
                hashed_password: user.hashed_password,
                is_active: user.is_active,
                is_superuser: user.is_superuser,
                is_deleted: false,
                deleted_at: None,
                created_at: now,
                updated_at: now,
                roles: Vec::new(),
            };
            t.users.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<User>> {
        self.read(|t| {
            t.users
                .get(&id)
                .filter(|u| !(exclude_deleted && u.is_deleted))
                .map(|u| t.user_with_roles(u))
        })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.read(|t| {
            t.users
                .values()
                .find(|u| u.username == username && !u.is_deleted)
                .map(|u| t.user_with_roles(u))
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.read(|t| {
            t.users
                .values()
                .find(|u| u.email == email && !u.is_deleted)
                .map(|u| t.user_with_roles(u))
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<User>> {
        self.read(|t| {
            let mut users: Vec<User> = t
                .users
                .values()
                .filter(|u| !u.is_deleted && matches_search(query, &[u.username.as_str(), u.email.as_str()]))
                .map(|u| t.user_with_roles(u))
                .collect();
            users.sort_by_key(|u| u.created_at);
            page(users, query)
        })
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>> {
        self.write(|t| {
            if let Some(email) = &update.email {
                if t.users.values().any(|u| u.id != id && &u.email == email) {
                    return Err(unique_violation("users_email_key"));
                }
            }
            if let Some(username) = &update.username {
                if t.users.values().any(|u| u.id != id && &u.username == username) {
                    return Err(unique_violation("users_username_key"));
                }
            }

            let Some(user) = t.users.get_mut(&id).filter(|u| !u.is_deleted) else {
                return Ok(None);
            };
            if let Some(email) = update.email {
                user.email = email;
            }
            if let Some(username) = update.username {
                user.username = username;
            }
            if let Some(hash) = update.hashed_password {
                user.hashed_password = hash;
            }
            if let Some(active) = update.is_active {
                user.is_active = active;
            }
            user.updated_at = Utc::now();

            let user = user.clone();
            Ok(Some(t.user_with_roles(&user)))
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        self.write(|t| match t.users.get_mut(&id).filter(|u| !u.is_deleted) {
            Some(user) => {
                let now = Utc::now();
                user.is_deleted = true;
                user.deleted_at = Some(now);
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn set_roles(&self, id: Uuid, role_ids: &[Uuid]) -> Result<()> {
        self.write(|t| {
            let mut ids = role_ids.to_vec();
            ids.sort();
            ids.dedup();
            t.user_roles.insert(id, ids);
            Ok(())
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn create(&self, role: NewRole) -> Result<Role> {
        self.write(|t| {
            if t.roles.values().any(|r| r.name == role.name) {
                return Err(unique_violation("roles_name_key"));
            }
            let now = Utc::now();
            let record = Role {
                id: Uuid::new_v4(),
                name: role.name,
                description: role.description,
                permissions: Vec::new(),
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            t.roles.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Role>> {
        self.read(|t| {
            t.roles
                .get(&id)
                .filter(|r| !(exclude_deleted && r.is_deleted))
                .map(|r| t.role_with_permissions(r))
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.read(|t| {
            t.roles
                .values()
                .find(|r| r.name == name && !r.is_deleted)
                .map(|r| t.role_with_permissions(r))
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Role>> {
        self.read(|t| {
            let mut roles: Vec<Role> = t
                .roles
                .values()
                .filter(|r| !r.is_deleted && matches_search(query, &[r.name.as_str()]))
                .map(|r| t.role_with_permissions(r))
                .collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));
            page(roles, query)
        })
    }

    async fn update(&self, id: Uuid, update: RoleUpdate) -> Result<Option<Role>> {
        self.write(|t| {
            if let Some(name) = &update.name {
                if t.roles.values().any(|r| r.id != id && &r.name == name) {
                    return Err(unique_violation("roles_name_key"));
                }
            }
            let Some(role) = t.roles.get_mut(&id).filter(|r| !r.is_deleted) else {
                return Ok(None);
            };
            if let Some(name) = update.name {
                role.name = name;
            }
            if let Some(description) = update.description {
                role.description = Some(description);
            }
            role.updated_at = Utc::now();

            let role = role.clone();
            Ok(Some(t.role_with_permissions(&role)))
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        self.write(|t| match t.roles.get_mut(&id).filter(|r| !r.is_deleted) {
            Some(role) => {
                role.is_deleted = true;
                role.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn set_permissions(&self, id: Uuid, permission_ids: &[Uuid]) -> Result<()> {
        self.write(|t| {
            let mut ids = permission_ids.to_vec();
            ids.sort();
            ids.dedup();
            t.role_permissions.insert(id, ids);
            Ok(())
        })
    }

    async fn add_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()> {
        self.write(|t| {
            let ids = t.role_permissions.entry(id).or_default();
            if !ids.contains(&permission_id) {
                ids.push(permission_id);
            }
            Ok(())
        })
    }

    async fn remove_permission(&self, id: Uuid, permission_id: Uuid) -> Result<()> {
        self.write(|t| {
            if let Some(ids) = t.role_permissions.get_mut(&id) {
                ids.retain(|p| *p != permission_id);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn create(&self, permission: NewPermission) -> Result<Permission> {
        self.write(|t| {
            if t.permissions.values().any(|p| p.name == permission.name) {
                return Err(unique_violation("permissions_name_key"));
            }
            let now = Utc::now();
            let record = Permission {
                id: Uuid::new_v4(),
                name: permission.name,
                resource: permission.resource,
                action: permission.action,
                description: permission.description,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            t.permissions.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn find_by_id(&self, id: Uuid, exclude_deleted: bool) -> Result<Option<Permission>> {
        self.read(|t| {
            t.permissions
                .get(&id)
                .filter(|p| !(exclude_deleted && p.is_deleted))
                .cloned()
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>> {
        self.read(|t| {
            t.permissions
                .values()
                .find(|p| p.name == name && !p.is_deleted)
                .cloned()
        })
    }

    async fn find_by_resource_and_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        self.read(|t| {
            t.permissions
                .values()
                .find(|p| p.resource == resource && p.action == action && !p.is_deleted)
                .cloned()
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Permission>> {
        self.read(|t| {
            let mut perms: Vec<Permission> = t
                .permissions
                .values()
                .filter(|p| !p.is_deleted && matches_search(query, &[p.name.as_str()]))
                .cloned()
                .collect();
            perms.sort_by(|a, b| a.name.cmp(&b.name));
            page(perms, query)
        })
    }

    async fn list_by_resource(&self, resource: &str) -> Result<Vec<Permission>> {
        self.read(|t| {
            let mut perms: Vec<Permission> = t
                .permissions
                .values()
                .filter(|p| p.resource == resource && !p.is_deleted)
                .cloned()
                .collect();
            perms.sort_by(|a, b| a.action.cmp(&b.action));
            perms
        })
    }

    async fn update(&self, id: Uuid, update: PermissionUpdate) -> Result<Option<Permission>> {
        self.write(|t| {
            if let Some(name) = &update.name {
                if t.permissions.values().any(|p| p.id != id && &p.name == name) {
                    return Err(unique_violation("permissions_name_key"));
                }
            }
            let Some(perm) = t.permissions.get_mut(&id).filter(|p| !p.is_deleted) else {
                return Ok(None);
            };
            if let Some(name) = update.name {
                perm.name = name;
            }
            if let Some(resource) = update.resource {
                perm.resource = resource;
            }
            if let Some(action) = update.action {
                perm.action = action;
            }
            if let Some(description) = update.description {
                perm.description = Some(description);
            }
            perm.updated_at = Utc::now();
            Ok(Some(perm.clone()))
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        self.write(|t| match t.permissions.get_mut(&id).filter(|p| !p.is_deleted) {
            Some(perm) => {
                perm.is_deleted = true;
                perm.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            email: format!("{name}@x.com"),
            username: name.to_string(),
            hashed_password: "hash".to_string(),
            is_active: true,
            is_superuser: false,
        }
    }

    #[tokio::test]
    async fn test_soft_delete_exclusion() {
        let store = MemoryStore::new();
        let user = UserRepository::create(&store, new_user("alice")).await.unwrap();

        assert!(UserRepository::soft_delete(&store, user.id).await.unwrap());

        assert!(UserRepository::find_by_id(&store, user.id, true)
            .await
            .unwrap()
            .is_none());
        let deleted = UserRepository::find_by_id(&store, user.id, false)
            .await
            .unwrap()
            .unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.deleted_at.is_some());
        assert!(store.find_by_username("alice").await.unwrap().is_none());
        assert!(store.find_by_email("alice@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_unique_violation() {
        let store = MemoryStore::new();
        UserRepository::create(&store, new_user("alice")).await.unwrap();

        let mut dup = new_user("bob");
        dup.email = "alice@x.com".to_string();
        let err = UserRepository::create(&store, dup).await.unwrap_err();
        assert!(err.original_error().unwrap().contains("duplicate key"));
    }

    #[tokio::test]
    async fn test_role_permission_changes_are_live() {
        let store = MemoryStore::new();
        let user = UserRepository::create(&store, new_user("carol")).await.unwrap();
        let role = RoleRepository::create(
            &store,
            NewRole {
                name: "editor".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
        let perm = PermissionRepository::create(&store, NewPermission::new("tasks", "update", None))
            .await
            .unwrap();

        store.set_roles(user.id, &[role.id]).await.unwrap();
        store.add_permission(role.id, perm.id).await.unwrap();

        let loaded = UserRepository::find_by_id(&store, user.id, true)
            .await
            .unwrap()
            .unwrap();
        assert!(rbac::has_permission(&loaded.access_profile(), "tasks:update"));

        store.remove_permission(role.id, perm.id).await.unwrap();
        let loaded = UserRepository::find_by_id(&store, user.id, true)
            .await
            .unwrap()
            .unwrap();
        assert!(!rbac::has_permission(&loaded.access_profile(), "tasks:update"));
    }

    #[tokio::test]
    async fn test_list_search_and_paging() {
        let store = MemoryStore::new();
        for name in ["anna", "annie", "bob"] {
            UserRepository::create(&store, new_user(name)).await.unwrap();
        }

        let query = ListQuery {
            search: Some("ann".to_string()),
            ..Default::default()
        };
        assert_eq!(UserRepository::list(&store, &query).await.unwrap().len(), 2);

        let query = ListQuery {
            skip: 1,
            limit: 1,
            search: None,
        };
        assert_eq!(UserRepository::list(&store, &query).await.unwrap().len(), 1);
    }
}
