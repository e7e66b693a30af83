//! User administration handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{AssignRolesRequest, PageParams, UserResponse, UserSummary, UserUpdateRequest};
use crate::services::{ProfileChanges, UserService};
use crate::state::AppState;
use crate::validation::{ApiPath, ApiQuery, ValidatedJson};

/// List users
#[utoipa::path(
    get,
    path = "/api/v1/auth/users",
    tag = "users",
    params(PageParams),
    responses(
        (status = 200, description = "Users", body = Vec<UserSummary>),
        (status = 403, description = "Missing users:read", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    params.validate()?;
    let users = UserService::from_state(&state)
        .list_users(&params.into())
        .await?;
    Ok(Json(users.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "Unknown user", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state).get_user(id).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 404, description = "Unknown user", body = crate::error::ProblemDetails),
        (status = 409, description = "Email or username taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<UserUpdateRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state)
        .update_user(
            id,
            ProfileChanges {
                email: request.email,
                username: request.username,
                is_active: request.is_active,
            },
        )
        .await?;
    Ok(Json(user.into()))
}

/// Soft delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "Unknown user", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    UserService::from_state(&state).delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/users/{id}/activate",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User activated", body = UserResponse),
        (status = 404, description = "Unknown user", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn activate_user_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state).set_active(id, true).await?;
    Ok(Json(user.into()))
}

/// Deactivated users keep their data but fail every gate
#[utoipa::path(
    post,
    path = "/api/v1/auth/users/{id}/deactivate",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deactivated", body = UserResponse),
        (status = 404, description = "Unknown user", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn deactivate_user_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state).set_active(id, false).await?;
    Ok(Json(user.into()))
}

/// Replace a user's roles
#[utoipa::path(
    post,
    path = "/api/v1/auth/users/{id}/roles",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRolesRequest,
    responses(
        (status = 200, description = "Roles assigned", body = UserResponse),
        (status = 403, description = "Superuser required", body = crate::error::ProblemDetails),
        (status = 404, description = "Unknown user or role", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn assign_roles_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<AssignRolesRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state)
        .assign_roles(id, &request.role_ids)
        .await?;
    Ok(Json(user.into()))
}
