//! Permission management
//!
//! Permissions are unique by name and, separately, by (resource, action).

use prodtrack_core::{AppError, ListQuery, NewPermission, Permission, PermissionUpdate, Repositories};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Input for creating or updating a permission
#[derive(Debug, Clone, Default)]
pub struct PermissionDraft {
    pub name: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

fn combination_exists(resource: &str, action: &str) -> AppError {
    AppError::already_exists("Permission", "resource_action", &format!("{resource}:{action}"))
        .with_user_message("A permission for this resource and action combination already exists.")
        .with_context("resource", resource)
        .with_context("action", action)
}

pub struct PermissionService<'a> {
    repos: &'a Repositories,
}

impl<'a> PermissionService<'a> {
    pub fn new(repos: &'a Repositories) -> Self {
        Self { repos }
    }

    pub async fn create_permission(
        &self,
        name: &str,
        resource: &str,
        action: &str,
        description: Option<String>,
    ) -> ApiResult<Permission> {
        if self.repos.permissions.find_by_name(name).await?.is_some() {
            return Err(AppError::already_exists("Permission", "name", name).into());
        }
        if self
            .repos
            .permissions
            .find_by_resource_and_action(resource, action)
            .await?
            .is_some()
        {
            tracing::warn!(resource, action, "Permission combination already exists");
            return Err(combination_exists(resource, action).into());
        }

        let permission = self
            .repos
            .permissions
            .create(NewPermission {
                name: name.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
                description,
            })
            .await?;
        tracing::info!(permission_id = %permission.id, name, "Permission created");
        Ok(permission)
    }

    pub async fn get_permission(&self, id: Uuid) -> ApiResult<Permission> {
        self.repos
            .permissions
            .find_by_id(id, true)
            .await?
            .ok_or_else(|| AppError::not_found("Permission", Some(&id.to_string())).into())
    }

    pub async fn get_permission_by_name(&self, name: &str) -> ApiResult<Permission> {
        self.repos
            .permissions
            .find_by_name(name)
            .await?
            .ok_or_else(|| AppError::not_found("Permission", Some(name)).into())
    }

    pub async fn list_permissions(&self, query: &ListQuery) -> ApiResult<Vec<Permission>> {
        Ok(self.repos.permissions.list(query).await?)
    }

    pub async fn list_by_resource(&self, resource: &str) -> ApiResult<Vec<Permission>> {
        Ok(self.repos.permissions.list_by_resource(resource).await?)
    }

    pub async fn update_permission(&self, id: Uuid, draft: PermissionDraft) -> ApiResult<Permission> {
        let current = self.get_permission(id).await?;
        let mut update = PermissionUpdate {
            description: draft.description,
            ..PermissionUpdate::default()
        };

        if let Some(name) = draft.name.filter(|n| *n != current.name) {
            if self.repos.permissions.find_by_name(&name).await?.is_some() {
                return Err(AppError::already_exists("Permission", "name", &name).into());
            }
            update.name = Some(name);
        }

        let resource = draft.resource.filter(|r| !r.is_empty());
        let action = draft.action.filter(|a| !a.is_empty());
        if resource.is_some() || action.is_some() {
            let new_resource = resource.as_deref().unwrap_or(&current.resource);
            let new_action = action.as_deref().unwrap_or(&current.action);
            let clash = self
                .repos
                .permissions
                .find_by_resource_and_action(new_resource, new_action)
                .await?;
            if clash.is_some_and(|p| p.id != id) {
                return Err(combination_exists(new_resource, new_action).into());
            }
        }
        update.resource = resource;
        update.action = action;

        self.repos
            .permissions
            .update(id, update)
            .await?
            .ok_or_else(|| ApiError::from(AppError::not_found("Permission", Some(&id.to_string()))))
    }

    /// Soft delete
    pub async fn delete_permission(&self, id: Uuid) -> ApiResult<()> {
        if !self.repos.permissions.soft_delete(id).await? {
            return Err(AppError::not_found("Permission", Some(&id.to_string())).into());
        }
        tracing::info!(permission_id = %id, "Permission deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodtrack_core::memory::MemoryStore;
    use prodtrack_core::ErrorKind;
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
    async fn test_duplicate_resource_action_with_different_name() {
        let repos = repos();
        let service = PermissionService::new(&repos);

        service
            .create_permission("tasks:create", "task", "create", None)
            .await
            .unwrap();

        let err = service
            .create_permission("make-tasks", "task", "create", None)
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);
        assert_eq!(service.list_by_resource("task").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name() {
        let repos = repos();
        let service = PermissionService::new(&repos);
        service
            .create_permission("tasks:create", "task", "create", None)
            .await
            .unwrap();

        let err = service
            .create_permission("tasks:create", "task", "update", None)
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);
    }

    #[tokio::test]
    async fn test_update_rejects_combination_clash() {
        let repos = repos();
        let service = PermissionService::new(&repos);
        service
            .create_permission("tasks:create", "task", "create", None)
            .await
            .unwrap();
        let update = service
            .create_permission("tasks:update", "task", "update", None)
            .await
            .unwrap();

        let err = service
            .update_permission(
                update.id,
                PermissionDraft {
                    action: Some("create".to_string()),
                    ..PermissionDraft::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);

        let renamed = service
            .update_permission(
                update.id,
                PermissionDraft {
                    description: Some("Edit tasks".to_string()),
                    ..PermissionDraft::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.description.as_deref(), Some("Edit tasks"));
    }

    #[tokio::test]
    async fn test_lookup_and_delete() {
        let repos = repos();
        let service = PermissionService::new(&repos);
        let perm = service
            .create_permission("users:read", "users", "read", Some("Read users".to_string()))
            .await
            .unwrap();

        assert_eq!(service.get_permission_by_name("users:read").await.unwrap().id, perm.id);
        service.delete_permission(perm.id).await.unwrap();
        assert_eq!(
            kind(service.get_permission(perm.id).await.unwrap_err()),
            ErrorKind::ResourceNotFound
        );
        assert_eq!(
            kind(service.delete_permission(perm.id).await.unwrap_err()),
            ErrorKind::ResourceNotFound
        );
    }
}
