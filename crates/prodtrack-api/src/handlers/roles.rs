//! Role management handlers (superuser only)

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{
    AssignPermissionsRequest, PageParams, RoleCreateRequest, RoleResponse, RoleUpdateRequest,
};
use crate::services::{RoleDraft, RoleService};
use crate::state::AppState;
use crate::validation::{ApiPath, ApiQuery, ValidatedJson};

#[utoipa::path(
    post,
    path = "/api/v1/roles",
    tag = "roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 404, description = "Unknown permission id", body = crate::error::ProblemDetails),
        (status = 409, description = "Role name taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn create_role_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<RoleCreateRequest>,
) -> ApiResult<(StatusCode, Json<RoleResponse>)> {
    let role = RoleService::new(&state.repos)
        .create_role(
            &request.name,
            RoleDraft {
                name: None,
                description: request.description,
                permission_ids: Some(request.permission_ids),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(role.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/roles",
    tag = "roles",
    params(PageParams),
    responses((status = 200, description = "Roles", body = Vec<RoleResponse>)),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn list_roles_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Json<Vec<RoleResponse>>> {
    params.validate()?;
    let roles = RoleService::new(&state.repos)
        .list_roles(&params.into())
        .await?;
    Ok(Json(roles.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/roles/{id}",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = RoleResponse),
        (status = 404, description = "Unknown role", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn get_role_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<RoleResponse>> {
    Ok(Json(RoleService::new(&state.repos).get_role(id).await?.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/roles/name/{name}",
    tag = "roles",
    params(("name" = String, Path, description = "Role name")),
    responses(
        (status = 200, description = "Role", body = RoleResponse),
        (status = 404, description = "Unknown role", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn get_role_by_name_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Json<RoleResponse>> {
    Ok(Json(
        RoleService::new(&state.repos)
            .get_role_by_name(&name)
            .await?
            .into(),
    ))
}

/// Update a role; `permission_ids` replaces the permission set when given
#[utoipa::path(
    put,
    path = "/api/v1/roles/{id}",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleResponse),
        (status = 404, description = "Unknown role or permission", body = crate::error::ProblemDetails),
        (status = 409, description = "Role name taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn update_role_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<RoleUpdateRequest>,
) -> ApiResult<Json<RoleResponse>> {
    let role = RoleService::new(&state.repos)
        .update_role(
            id,
            RoleDraft {
                name: request.name,
                description: request.description,
                permission_ids: request.permission_ids,
            },
        )
        .await?;
    Ok(Json(role.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/roles/{id}",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Unknown role", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn delete_role_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    RoleService::new(&state.repos).delete_role(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/roles/{id}/permissions",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = AssignPermissionsRequest,
    responses(
        (status = 200, description = "Permissions replaced", body = RoleResponse),
        (status = 404, description = "Unknown role or permission", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn assign_permissions_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<AssignPermissionsRequest>,
) -> ApiResult<Json<RoleResponse>> {
    let role = RoleService::new(&state.repos)
        .assign_permissions(id, &request.permission_ids)
        .await?;
    Ok(Json(role.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/roles/{id}/permissions/{permission_id}",
    tag = "roles",
    params(
        ("id" = Uuid, Path, description = "Role id"),
        ("permission_id" = Uuid, Path, description = "Permission id"),
    ),
    responses(
        (status = 200, description = "Permission added", body = RoleResponse),
        (status = 404, description = "Unknown role or permission", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn add_permission_handler(
    State(state): State<Arc<AppState>>,
    ApiPath((id, permission_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<RoleResponse>> {
    let role = RoleService::new(&state.repos)
        .add_permission(id, permission_id)
        .await?;
    Ok(Json(role.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/roles/{id}/permissions/{permission_id}",
    tag = "roles",
    params(
        ("id" = Uuid, Path, description = "Role id"),
        ("permission_id" = Uuid, Path, description = "Permission id"),
    ),
    responses(
        (status = 200, description = "Permission removed", body = RoleResponse),
        (status = 404, description = "Unknown role", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn remove_permission_handler(
    State(state): State<Arc<AppState>>,
    ApiPath((id, permission_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<RoleResponse>> {
    let role = RoleService::new(&state.repos)
        .remove_permission(id, permission_id)
        .await?;
    Ok(Json(role.into()))
}
