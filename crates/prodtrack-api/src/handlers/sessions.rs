//! Session management handlers

use axum::{extract::State, http::HeaderMap, Extension, Json};
use std::sync::Arc;

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::middleware::CurrentUser;
use crate::models::{LogoutAllResponse, SessionInfo};
use crate::state::AppState;

/// Revoke every tracked session of the current user
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "sessions",
    responses(
        (status = 200, description = "Sessions revoked", body = LogoutAllResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ProblemDetails),
        (status = 403, description = "Account inactive", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Json<LogoutAllResponse> {
    if !state.sessions.is_connected() {
        return Json(LogoutAllResponse {
            message: "Redis not available, cannot logout all sessions".to_string(),
            sessions_deleted: 0,
        });
    }

    let sessions_deleted = state.sessions.delete_user_sessions(current.user.id).await;
    audit_log(&AuditEvent::LogoutAll {
        user_id: current.user.id,
        sessions_deleted,
        client: ClientInfo::from_headers(&headers),
    });

    Json(LogoutAllResponse {
        message: "Successfully logged out from all sessions".to_string(),
        sessions_deleted,
    })
}

/// Count of tracked sessions for the current user
#[utoipa::path(
    get,
    path = "/api/v1/auth/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "Session information", body = SessionInfo),
        (status = 401, description = "Unauthorized", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Json<SessionInfo> {
    Json(SessionInfo {
        active_sessions: state.sessions.get_user_sessions_count(current.user.id).await,
        redis_available: state.sessions.is_connected(),
    })
}
