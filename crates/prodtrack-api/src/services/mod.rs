//! Business rules over the repositories
//!
//! Handlers validate input shape; services enforce uniqueness, existence and
//! credential rules, and return structured errors unchanged.

pub mod permissions;
pub mod roles;
pub mod users;

pub use permissions::{PermissionDraft, PermissionService};
pub use roles::{RoleDraft, RoleService};
pub use users::{AccountDraft, ProfileChanges, UserService};

use crate::error::ApiError;

/// Run CPU-heavy work (password hashing) off the async workers
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Unexpected(format!("blocking task failed: {e}")))
}
