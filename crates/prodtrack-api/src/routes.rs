//! API route definitions
//!
//! Every group is wrapped in the gates it needs. `route_layer` runs the last
//! added layer first, so authentication is always added after the gate it
//! protects.

use crate::auth::middleware::{
    auth_middleware, require_active, require_permission, require_superuser,
};
use crate::handlers::{auth, permissions, roles, sessions, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let authenticate = middleware::from_fn_with_state(state, auth_middleware);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler));

    // Any valid token, even for a deactivated account
    let logout_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route_layer(authenticate.clone());

    let account_routes = Router::new()
        .route(
            "/auth/me",
            get(auth::me_handler).put(auth::update_me_handler),
        )
        .route("/auth/me/password", put(auth::change_password_handler))
        .route("/auth/logout-all", post(sessions::logout_all_handler))
        .route("/auth/sessions", get(sessions::sessions_handler))
        .route_layer(middleware::from_fn(require_active))
        .route_layer(authenticate.clone());

    let user_routes = Router::new()
        .route(
            "/auth/users",
            get(users::list_users_handler)
                .route_layer(middleware::from_fn(require_permission("users:read"))),
        )
        .route(
            "/auth/users/:id",
            get(users::get_user_handler)
                .route_layer(middleware::from_fn(require_permission("users:read"))),
        )
        .route(
            "/auth/users/:id",
            put(users::update_user_handler)
                .route_layer(middleware::from_fn(require_permission("users:update"))),
        )
        .route(
            "/auth/users/:id",
            delete(users::delete_user_handler)
                .route_layer(middleware::from_fn(require_permission("users:delete"))),
        )
        .route(
            "/auth/users/:id/activate",
            post(users::activate_user_handler)
                .route_layer(middleware::from_fn(require_permission("users:update"))),
        )
        .route(
            "/auth/users/:id/deactivate",
            post(users::deactivate_user_handler)
                .route_layer(middleware::from_fn(require_permission("users:update"))),
        )
        .route(
            "/auth/users/:id/roles",
            post(users::assign_roles_handler).route_layer(middleware::from_fn(require_superuser)),
        )
        .route_layer(authenticate.clone());

    let admin_routes = Router::new()
        // Roles
        .route(
            "/roles",
            post(roles::create_role_handler).get(roles::list_roles_handler),
        )
        .route("/roles/name/:name", get(roles::get_role_by_name_handler))
        .route(
            "/roles/:id",
            get(roles::get_role_handler)
                .put(roles::update_role_handler)
                .delete(roles::delete_role_handler),
        )
        .route(
            "/roles/:id/permissions",
            post(roles::assign_permissions_handler),
        )
        .route(
            "/roles/:id/permissions/:permission_id",
            post(roles::add_permission_handler).delete(roles::remove_permission_handler),
        )
        // Permissions
        .route(
            "/permissions",
            post(permissions::create_permission_handler).get(permissions::list_permissions_handler),
        )
        .route(
            "/permissions/name/:name",
            get(permissions::get_permission_by_name_handler),
        )
        .route(
            "/permissions/resource/:resource",
            get(permissions::list_by_resource_handler),
        )
        .route(
            "/permissions/:id",
            get(permissions::get_permission_handler)
                .put(permissions::update_permission_handler)
                .delete(permissions::delete_permission_handler),
        )
        .route_layer(middleware::from_fn(require_superuser))
        .route_layer(authenticate);

    Router::new()
        .merge(public_routes)
        .merge(logout_routes)
        .merge(account_routes)
        .merge(user_routes)
        .merge(admin_routes)
}
