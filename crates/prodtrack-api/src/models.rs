//! Request and response bodies
//!
//! Domain models live in `prodtrack-core`; these are their HTTP shapes.
//! Password digests and soft-delete bookkeeping never leave the service.

use chrono::{DateTime, Utc};
use prodtrack_core::{ListQuery, Permission, Role, User};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionResponse {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Permission> for PermissionResponse {
    fn from(p: Permission) -> Self {
        Self {
            id: p.id,
            name: p.name,
            resource: p.resource,
            action: p.action,
            description: p.description,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<PermissionResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(r: Role) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
            permissions: r.permissions.into_iter().map(Into::into).collect(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Full user profile with roles
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub roles: Vec<RoleResponse>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            username: u.username,
            is_active: u.is_active,
            is_superuser: u.is_superuser,
            created_at: u.created_at,
            updated_at: u.updated_at,
            roles: u.roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Compact user entry for lists and login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            is_active: u.is_active,
            is_superuser: u.is_superuser,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub message: String,
    pub user: UserSummary,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    /// Tracked sessions; may include ones that already expired
    pub active_sessions: u64,
    pub redis_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutAllResponse {
    pub message: String,
    pub sessions_deleted: u64,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 100))]
    pub username: String,
    #[validate(length(min = 8, max = 100))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Self-service profile change
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ProfileUpdateRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 3, max = 100))]
    pub username: Option<String>,
}

/// Administrative user change
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UserUpdateRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 3, max = 100))]
    pub username: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    #[validate(length(min = 8, max = 100))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AssignRolesRequest {
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RoleCreateRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RoleUpdateRequest {
    #[validate(length(min = 1, max = 50))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub permission_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AssignPermissionsRequest {
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PermissionCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub resource: String,
    #[validate(length(min = 1, max = 50))]
    pub action: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PermissionUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub resource: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub action: Option<String>,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

/// Paging and search for list endpoints
#[derive(Debug, Clone, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Rows to skip
    #[serde(default)]
    #[validate(range(min = 0))]
    pub skip: i64,
    /// Maximum rows to return (1-1000)
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub limit: i64,
    /// Substring match on username/email or name
    pub search: Option<String>,
}

fn default_limit() -> i64 {
    100
}

impl From<PageParams> for ListQuery {
    fn from(p: PageParams) -> Self {
        Self {
            skip: p.skip,
            limit: p.limit,
            search: p.search.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_response_hides_secrets() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "alice@x.com".to_string(),
            username: "alice".to_string(),
            hashed_password: "$argon2id$v=19$secret".to_string(),
            is_active: true,
            is_superuser: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            roles: vec![],
        };

        let json = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert_eq!(json["username"], "alice");
        assert!(json.get("hashed_password").is_none());
        assert!(json.get("is_deleted").is_none());
    }

    #[test]
    fn test_register_request_rules() {
        let ok = RegisterRequest {
            email: "alice@x.com".to_string(),
            username: "alice".to_string(),
            password: "Secret123!".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = RegisterRequest {
            email: "not-an-email".to_string(),
            username: "al".to_string(),
            password: "short".to_string(),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn test_page_params_to_list_query() {
        let query = ListQuery::from(PageParams {
            skip: 5,
            limit: 10,
            search: Some("  ".to_string()),
        });
        assert_eq!(query.skip, 5);
        assert_eq!(query.limit, 10);
        assert!(query.search.is_none());
    }
}
