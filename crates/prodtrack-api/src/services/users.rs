//! Account and principal management

use prodtrack_core::{AppError, ListQuery, NewUser, Repositories, User, UserUpdate};
use uuid::Uuid;

use super::run_blocking;
use crate::auth::password::{validate_password_strength, CredentialHasher};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Input for a new account
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Profile fields that may change; `None` leaves a field as is
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub is_active: Option<bool>,
}

pub struct UserService<'a> {
    repos: &'a Repositories,
    hasher: &'a CredentialHasher,
}

impl<'a> UserService<'a> {
    pub fn new(repos: &'a Repositories, hasher: &'a CredentialHasher) -> Self {
        Self { repos, hasher }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(&state.repos, &state.hasher)
    }

    async fn hash(&self, password: &str) -> ApiResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        Ok(run_blocking(move || hasher.hash(&password)).await??)
    }

    async fn verify(&self, password: &str, digest: &str) -> ApiResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let digest = digest.to_string();
        Ok(run_blocking(move || hasher.verify(&password, &digest)).await??)
    }

    /// Create an active account
    ///
    /// Email is checked before username, so a request clashing on both
    /// reports the email.
    pub async fn create_user(&self, draft: AccountDraft, is_superuser: bool) -> ApiResult<User> {
        validate_password_strength(&draft.password).map_err(|reason| AppError::invalid_password(&reason))?;

        if self.repos.users.find_by_email(&draft.email).await?.is_some() {
            tracing::warn!(email = %draft.email, "User creation failed: email already exists");
            return Err(AppError::email_already_exists(&draft.email).into());
        }
        if self.repos.users.find_by_username(&draft.username).await?.is_some() {
            tracing::warn!(username = %draft.username, "User creation failed: username already exists");
            return Err(AppError::username_already_exists(&draft.username).into());
        }

        let hashed_password = self.hash(&draft.password).await?;
        let user = self
            .repos
            .users
            .create(NewUser {
                email: draft.email,
                username: draft.username,
                hashed_password,
                is_active: true,
                is_superuser,
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Check a username/password pair
    ///
    /// Unknown, soft-deleted and wrong-password cases are indistinguishable
    /// to the caller. Activity is not checked here.
    pub async fn authenticate(&self, username: &str, password: &str) -> ApiResult<User> {
        let Some(user) = self.repos.users.find_by_username(username).await? else {
            tracing::warn!(username, "Authentication failed: user not found");
            return Err(AppError::invalid_credentials(Some(username)).into());
        };

        if !self.verify(password, &user.hashed_password).await? {
            tracing::warn!(username, "Authentication failed: invalid password");
            return Err(AppError::invalid_credentials(Some(username)).into());
        }

        match self.hasher.needs_rehash(&user.hashed_password) {
            Ok(true) => tracing::info!(user_id = %user.id, "Password hash uses outdated parameters"),
            Ok(false) => {}
            Err(e) => tracing::warn!(user_id = %user.id, error = %e, "Could not inspect password hash"),
        }

        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> ApiResult<User> {
        self.repos
            .users
            .find_by_id(id, true)
            .await?
            .ok_or_else(|| AppError::not_found("User", Some(&id.to_string())).into())
    }

    pub async fn list_users(&self, query: &ListQuery) -> ApiResult<Vec<User>> {
        Ok(self.repos.users.list(query).await?)
    }

    pub async fn update_user(&self, id: Uuid, changes: ProfileChanges) -> ApiResult<User> {
        let user = self.get_user(id).await?;
        let mut update = UserUpdate {
            is_active: changes.is_active,
            ..UserUpdate::default()
        };

        if let Some(email) = changes.email.filter(|e| *e != user.email) {
            if self.repos.users.find_by_email(&email).await?.is_some() {
                return Err(AppError::email_already_exists(&email).into());
            }
            update.email = Some(email);
        }

        if let Some(username) = changes.username.filter(|u| *u != user.username) {
            if self.repos.users.find_by_username(&username).await?.is_some() {
                return Err(AppError::username_already_exists(&username).into());
            }
            update.username = Some(username);
        }

        if update.is_empty() {
            return Ok(user);
        }
        self.apply(id, update).await
    }

    pub async fn change_password(
        &self,
        id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> ApiResult<User> {
        let user = self.get_user(id).await?;

        if !self.verify(current_password, &user.hashed_password).await? {
            tracing::warn!(user_id = %id, "Password update failed: incorrect current password");
            return Err(AppError::password_mismatch().into());
        }
        validate_password_strength(new_password).map_err(|reason| AppError::invalid_password(&reason))?;

        let hashed_password = self.hash(new_password).await?;
        let user = self
            .apply(
                id,
                UserUpdate {
                    hashed_password: Some(hashed_password),
                    ..UserUpdate::default()
                },
            )
            .await?;
        tracing::info!(user_id = %id, "Password updated");
        Ok(user)
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> ApiResult<User> {
        self.get_user(id).await?;
        self.apply(
            id,
            UserUpdate {
                is_active: Some(is_active),
                ..UserUpdate::default()
            },
        )
        .await
    }

    /// Soft delete
    pub async fn delete_user(&self, id: Uuid) -> ApiResult<()> {
        if !self.repos.users.soft_delete(id).await? {
            return Err(AppError::not_found("User", Some(&id.to_string())).into());
        }
        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }

    /// Replace the user's roles; every role must exist
    pub async fn assign_roles(&self, id: Uuid, role_ids: &[Uuid]) -> ApiResult<User> {
        self.get_user(id).await?;
        for role_id in role_ids {
            if self.repos.roles.find_by_id(*role_id, true).await?.is_none() {
                return Err(AppError::not_found("Role", Some(&role_id.to_string())).into());
            }
        }

        self.repos.users.set_roles(id, role_ids).await?;
        self.get_user(id).await
    }

    async fn apply(&self, id: Uuid, update: UserUpdate) -> ApiResult<User> {
        self.repos
            .users
            .update(id, update)
            .await?
            .ok_or_else(|| ApiError::from(AppError::not_found("User", Some(&id.to_string()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordConfig;
    use prodtrack_core::memory::MemoryStore;
    use prodtrack_core::{ErrorKind, NewRole};
    use std::sync::Arc;

    fn fixture() -> (Repositories, CredentialHasher) {
        (
            Repositories::from_store(Arc::new(MemoryStore::new())),
            CredentialHasher::new(PasswordConfig::fast()),
        )
    }

    fn alice() -> AccountDraft {
        AccountDraft {
            email: "alice@x.com".to_string(),
            username: "alice".to_string(),
            password: "Secret123!".to_string(),
        }
    }

    fn kind(err: ApiError) -> ErrorKind {
        match err {
            ApiError::App(e) => e.kind(),
            other => panic!("expected application error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);

        let user = service.create_user(alice(), false).await.unwrap();
        assert!(user.is_active);
        assert!(!user.is_superuser);
        assert_ne!(user.hashed_password, "Secret123!");

        let authed = service.authenticate("alice", "Secret123!").await.unwrap();
        assert_eq!(authed.id, user.id);

        let err = service.authenticate("alice", "wrong-password").await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::InvalidCredentials);
        let err = service.authenticate("nobody", "Secret123!").await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_duplicate_email_and_username() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        service.create_user(alice(), false).await.unwrap();

        let err = service
            .create_user(AccountDraft { username: "alice2".to_string(), ..alice() }, false)
            .await
            .unwrap_err();
        match err {
            ApiError::App(e) => assert_eq!(e.code(), "EMAIL_ALREADY_EXISTS"),
            other => panic!("unexpected {other:?}"),
        }

        let err = service
            .create_user(AccountDraft { email: "other@x.com".to_string(), ..alice() }, false)
            .await
            .unwrap_err();
        match err {
            ApiError::App(e) => assert_eq!(e.code(), "USERNAME_ALREADY_EXISTS"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_weak_password_rejected() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        let err = service
            .create_user(AccountDraft { password: "short".to_string(), ..alice() }, false)
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_soft_deleted_user_cannot_authenticate() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        let user = service.create_user(alice(), false).await.unwrap();

        service.delete_user(user.id).await.unwrap();

        let err = service.authenticate("alice", "Secret123!").await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::InvalidCredentials);
        let err = service.get_user(user.id).await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceNotFound);
        let err = service.delete_user(user.id).await.unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_change_password() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        let user = service.create_user(alice(), false).await.unwrap();

        let err = service
            .change_password(user.id, "not-the-password", "NewSecret456!")
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::PasswordMismatch);

        service
            .change_password(user.id, "Secret123!", "NewSecret456!")
            .await
            .unwrap();
        assert!(service.authenticate("alice", "NewSecret456!").await.is_ok());
        assert!(service.authenticate("alice", "Secret123!").await.is_err());
    }

    #[tokio::test]
    async fn test_update_conflicts_and_activation() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        let alice = service.create_user(alice(), false).await.unwrap();
        service
            .create_user(
                AccountDraft {
                    email: "bob@x.com".to_string(),
                    username: "bob".to_string(),
                    password: "Secret123!".to_string(),
                },
                false,
            )
            .await
            .unwrap();

        let err = service
            .update_user(
                alice.id,
                ProfileChanges {
                    username: Some("bob".to_string()),
                    ..ProfileChanges::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceAlreadyExists);

        // Unchanged values are not conflicts
        let same = service
            .update_user(
                alice.id,
                ProfileChanges {
                    email: Some("alice@x.com".to_string()),
                    ..ProfileChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.email, "alice@x.com");

        let inactive = service.set_active(alice.id, false).await.unwrap();
        assert!(!inactive.is_active);
    }

    #[tokio::test]
    async fn test_assign_roles_requires_existing_roles() {
        let (repos, hasher) = fixture();
        let service = UserService::new(&repos, &hasher);
        let user = service.create_user(alice(), false).await.unwrap();
        let role = repos
            .roles
            .create(NewRole {
                name: "viewer".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let err = service
            .assign_roles(user.id, &[role.id, Uuid::new_v4()])
            .await
            .unwrap_err();
        assert_eq!(kind(err), ErrorKind::ResourceNotFound);

        let user = service.assign_roles(user.id, &[role.id]).await.unwrap();
        assert_eq!(user.roles.len(), 1);
        assert_eq!(user.roles[0].name, "viewer");
    }
}
