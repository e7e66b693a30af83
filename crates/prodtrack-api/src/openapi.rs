//! OpenAPI document and Swagger UI

use crate::error::{FieldViolation, ProblemDetail, ProblemDetails};
use crate::handlers::{auth, health, permissions, roles, sessions, users};
use crate::models::*;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";
pub const SWAGGER_UI_PATH: &str = "/swagger-ui";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Productivity Tracker API",
        description = "Authentication and role-based access control"
    ),
    paths(
        health::health_check,
        health::detailed_health_check,
        auth::register_handler,
        auth::login_handler,
        auth::refresh_handler,
        auth::logout_handler,
        auth::me_handler,
        auth::update_me_handler,
        auth::change_password_handler,
        sessions::logout_all_handler,
        sessions::sessions_handler,
        users::list_users_handler,
        users::get_user_handler,
        users::update_user_handler,
        users::delete_user_handler,
        users::activate_user_handler,
        users::deactivate_user_handler,
        users::assign_roles_handler,
        roles::create_role_handler,
        roles::list_roles_handler,
        roles::get_role_handler,
        roles::get_role_by_name_handler,
        roles::update_role_handler,
        roles::delete_role_handler,
        roles::assign_permissions_handler,
        roles::add_permission_handler,
        roles::remove_permission_handler,
        permissions::create_permission_handler,
        permissions::list_permissions_handler,
        permissions::get_permission_handler,
        permissions::get_permission_by_name_handler,
        permissions::list_by_resource_handler,
        permissions::update_permission_handler,
        permissions::delete_permission_handler,
    ),
    components(schemas(
        ProblemDetails,
        ProblemDetail,
        FieldViolation,
        health::HealthResponse,
        health::DetailedHealthResponse,
        health::HealthComponents,
        health::ComponentStatus,
        PermissionResponse,
        RoleResponse,
        UserResponse,
        UserSummary,
        LoginResponse,
        TokenResponse,
        MessageResponse,
        SessionInfo,
        LogoutAllResponse,
        RegisterRequest,
        LoginRequest,
        RefreshRequest,
        ProfileUpdateRequest,
        UserUpdateRequest,
        PasswordChangeRequest,
        AssignRolesRequest,
        RoleCreateRequest,
        RoleUpdateRequest,
        AssignPermissionsRequest,
        PermissionCreateRequest,
        PermissionUpdateRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness and dependency checks"),
        (name = "auth", description = "Registration, login and profile"),
        (name = "sessions", description = "Tracked login sessions"),
        (name = "users", description = "User administration"),
        (name = "roles", description = "Role management"),
        (name = "permissions", description = "Permission management"),
    )
)]
pub struct ApiDoc;

/// Registers the bearer and cookie schemes referenced by protected paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "cookie_auth",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("prdtracker_user"))),
            );
        }
    }
}

/// Swagger UI serving the generated document
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, ApiDoc::openapi())
}
