//! Permission management handlers (superuser only)

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{
    PageParams, PermissionCreateRequest, PermissionResponse, PermissionUpdateRequest,
};
use crate::services::{PermissionDraft, PermissionService};
use crate::state::AppState;
use crate::validation::{ApiPath, ApiQuery, ValidatedJson};

/// Create a permission
///
/// Both the name and the (resource, action) pair must be unused.
#[utoipa::path(
    post,
    path = "/api/v1/permissions",
    tag = "permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = PermissionResponse),
        (status = 409, description = "Name or resource/action taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn create_permission_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<PermissionCreateRequest>,
) -> ApiResult<(StatusCode, Json<PermissionResponse>)> {
    let permission = PermissionService::new(&state.repos)
        .create_permission(
            &request.name,
            &request.resource,
            &request.action,
            request.description,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(permission.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/permissions",
    tag = "permissions",
    params(PageParams),
    responses((status = 200, description = "Permissions", body = Vec<PermissionResponse>)),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn list_permissions_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Json<Vec<PermissionResponse>>> {
    params.validate()?;
    let permissions = PermissionService::new(&state.repos)
        .list_permissions(&params.into())
        .await?;
    Ok(Json(permissions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/permissions/{id}",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission", body = PermissionResponse),
        (status = 404, description = "Unknown permission", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn get_permission_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<PermissionResponse>> {
    let permission = PermissionService::new(&state.repos).get_permission(id).await?;
    Ok(Json(permission.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/permissions/name/{name}",
    tag = "permissions",
    params(("name" = String, Path, description = "Permission name, e.g. users:read")),
    responses(
        (status = 200, description = "Permission", body = PermissionResponse),
        (status = 404, description = "Unknown permission", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn get_permission_by_name_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<Json<PermissionResponse>> {
    let permission = PermissionService::new(&state.repos)
        .get_permission_by_name(&name)
        .await?;
    Ok(Json(permission.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/permissions/resource/{resource}",
    tag = "permissions",
    params(("resource" = String, Path, description = "Resource name")),
    responses((status = 200, description = "Permissions on the resource", body = Vec<PermissionResponse>)),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn list_by_resource_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(resource): ApiPath<String>,
) -> ApiResult<Json<Vec<PermissionResponse>>> {
    let permissions = PermissionService::new(&state.repos)
        .list_by_resource(&resource)
        .await?;
    Ok(Json(permissions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/api/v1/permissions/{id}",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Permission id")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = PermissionResponse),
        (status = 404, description = "Unknown permission", body = crate::error::ProblemDetails),
        (status = 409, description = "Name or resource/action taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn update_permission_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<PermissionUpdateRequest>,
) -> ApiResult<Json<PermissionResponse>> {
    let permission = PermissionService::new(&state.repos)
        .update_permission(
            id,
            PermissionDraft {
                name: request.name,
                resource: request.resource,
                action: request.action,
                description: request.description,
            },
        )
        .await?;
    Ok(Json(permission.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/permissions/{id}",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Unknown permission", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn delete_permission_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    PermissionService::new(&state.repos).delete_permission(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
