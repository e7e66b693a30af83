//! Role management

use prodtrack_core::{AppError, ListQuery, NewRole, Repositories, Role, RoleUpdate};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Input for creating or updating a role
#[derive(Debug, Clone, Default)]
pub struct RoleDraft {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the permission set when present
    pub permission_ids: Option<Vec<Uuid>>,
}

pub struct RoleService<'a> {
    repos: &'a Repositories,
}

impl<'a> RoleService<'a> {
    pub fn new(repos: &'a Repositories) -> Self {
        Self { repos }
    }

    pub async fn create_role(&self, name: &str, draft: RoleDraft) -> ApiResult<Role> {
        if self.repos.roles.find_by_name(name).await?.is_some() {
            return Err(AppError::already_exists("Role", "name", name).into());
        }
        if let Some(ids) = &draft.permission_ids {
            self.ensure_permissions_exist(ids).await?;
        }

        let role = self
            .repos
            .roles
            .create(NewRole {
                name: name.to_string(),
                description: draft.description,
            })
            .await?;
        tracing::info!(role_id = %role.id, name, "Role created");

        match draft.permission_ids {
            Some(ids) if !ids.is_empty() => self.assign_permissions(role.id, &ids).await,
            _ => Ok(role),
        }
    }

    pub async fn get_role(&self, id: Uuid) -> ApiResult<Role> {
        self.repos
            .roles
            .find_by_id(id, true)
            .await?
            .ok_or_else(|| AppError::not_found("Role", Some(&id.to_string())).into())
    }

    pub async fn get_role_by_name(&self, name: &str) -> ApiResult<Role> {
        self.repos
            .roles
            .find_by_name(name)
            .await?
            .ok_or_else(|| AppError::not_found("Role", Some(name)).into())
    }

    pub async fn list_roles(&self, query: &ListQuery) -> ApiResult<Vec<Role>> {
        Ok(self.repos.roles.list(query).await?)
    }

    pub async fn update_role(&self, id: Uuid, draft: RoleDraft) -> ApiResult<Role> {
        let role = self.get_role(id).await?;
        let mut update = RoleUpdate {
            description: draft.description,
            ..RoleUpdate::default()
        };

        if let Some(name) = draft.name.filter(|n| *n != role.name) {
            if self.repos.roles.find_by_name(&name).await?.is_some() {
                return Err(AppError::already_exists("Role", "name", &name).into());
            }
            update.name = Some(name);
        }

        let updated = self
            .repos
            .roles
            .update(id, update)
            .await?
            .ok_or_else(|| ApiError::from(AppError::not_found("Role", Some(&id.to_string()))))?;

        match draft.permission_ids {
            Some(ids) => self.assign_permissions(id, &ids).await,
            None => Ok(updated),
        }
    }

    /// Soft delete
    pub async fn delete_role(&self, id: Uuid) -> ApiResult<()> {
        if !self.repos.roles.soft_delete(id).await? {
            return Err(AppError::not_found("Role", Some(&id.to_string())).into());
        }
        tracing::info!(role_id = %id, "Role deleted");
        Ok(())
    }

    /// Replace the role's permissions
    pub async fn assign_permissions(&self, id: Uuid, permission_ids: &[Uuid]) -> ApiResult<Role> {
        self.get_role(id).await?;
        self.ensure_permissions_exist(permission_ids).await?;
        self.repos.roles.set_permissions(id, permission_ids).await?;
        self.get_role(id).await
    }

    pub async fn add_permission(&self, id: Uuid, permission_id: Uuid) -> ApiResult<Role> {
        self.get_role(id).await?;
        self.ensure_permissions_exist(&[permission_id]).await?;
        self.repos.roles.add_permission(id, permission_id).await?;
        self.get_role(id).await
    }

    pub async fn remove_permission(&self, id: Uuid, permission_id: Uuid) -> ApiResult<Role> {
        self.get_role(id).await?;
        self.repos.roles.remove_permission(id, permission_id).await?;
        self.get_role(id).await
    }

    async fn ensure_permissions_exist(&self, permission_ids: &[Uuid]) -> ApiResult<()> {
        for permission_id in permission_ids {
            if self
                .repos
                .permissions
                .find_by_id(*permission_id, true)
                .await?
                .is_none()
            {
                return Err(
                    AppError::not_found("Permission", Some(&permission_id.to_string())).into(),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodtrack_core::memory::MemoryStore;
    use prodtrack_core::{ErrorKind, NewPermission};
    use std::sync::Arc;

    fn repos() -> Repositories {
        Repositories::from_store(Arc::new(MemoryStore::new()))
    }

    fn kind(err: ApiError) -> ErrorKind {
        match err {
            ApiError::App(e) => e.kind(),
            other => panic!("expected application error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_with_permissions() {
        let repos = repos();
        let read = repos
            .permissions
            .create(NewPermission::new("users", "read", None))
            .await
            .unwrap();

        let service = RoleService::new(&repos);
        let role = service
            .create_role(
                "viewer",
                RoleDraft {
                    description: Some("Read-only".to_string()),
                    permission_ids: Some(vec![read.id]),
                    ..RoleDraft::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(role.name, "viewer");
        assert_eq!(role.permission_names().collect::<Vec<_>>(), vec!["users:read"]);

        let err = service.create_role("viewer", RoleDraft::default()).await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);
    }

    #[tokio::test]
    async fn test_unknown_permission_is_not_found() {
        let repos = repos();
        let service = RoleService::new(&repos);

        let err = service
            .create_role(
                "admin",
                RoleDraft {
                    permission_ids: Some(vec![Uuid::new_v4()]),
                    ..RoleDraft::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceNotFound);
        // Nothing was created
        assert!(service.get_role_by_name("admin").await.is_err());
    }

    #[tokio::test]
    async fn test_add_and_remove_permission() {
        let repos = repos();
        let write = repos
            .permissions
            .create(NewPermission::new("tasks", "update", None))
            .await
            .unwrap();
        let service = RoleService::new(&repos);
        let role = service.create_role("editor", RoleDraft::default()).await.unwrap();

        let role = service.add_permission(role.id, write.id).await.unwrap();
        assert_eq!(role.permissions.len(), 1);
        // Idempotent
        let role = service.add_permission(role.id, write.id).await.unwrap();
        assert_eq!(role.permissions.len(), 1);

        let role = service.remove_permission(role.id, write.id).await.unwrap();
        assert!(role.permissions.is_empty());
    }

    #[tokio::test]
    async fn test_rename_conflict_and_delete() {
        let repos = repos();
        let service = RoleService::new(&repos);
        let admin = service.create_role("admin", RoleDraft::default()).await.unwrap();
        service.create_role("user", RoleDraft::default()).await.unwrap();

        let err = service
            .update_role(
                admin.id,
                RoleDraft {
                    name: Some("user".to_string()),
                    ..RoleDraft::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);

        service.delete_role(admin.id).await.unwrap();
        assert_eq!(kind(service.get_role(admin.id).await.unwrap_err()), ErrorKind::ResourceNotFound);
    }
}
