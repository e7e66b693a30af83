//! Authentication gate
//!
//! [`auth_middleware`] resolves the principal behind an access token and
//! stores it in request extensions as [`CurrentUser`]. The other gates read
//! that extension and layer on top of it:
//!
//! ```ignore
//! Router::new()
//!     .route("/users", get(list_users))
//!     .route_layer(middleware::from_fn(require_permission("users:read")))
//!     .route_layer(middleware::from_fn_with_state(state, auth_middleware));
//! ```
//!
//! Activity, superuser and permission gates all check `is_active` first.
//! Every rejection is an [`AppError`]: 401 for token problems, 403 for
//! authorization problems.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use prodtrack_core::{rbac, AppError, User};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use super::jwt::TokenType;
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated principal, available to handlers via `Extension<CurrentUser>`
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    /// Session id (`jti`) of the presented access token
    pub session_id: Option<String>,
}

/// Raw token from `Authorization: Bearer` or, failing that, the access cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolve the principal behind the request's access token
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<CurrentUser, AppError> {
    let token = extract_token(headers, &state.config.cookie.name)
        .ok_or_else(|| AppError::invalid_token("no token provided"))?;

    let claims = state
        .tokens
        .verify(&token)
        .ok_or_else(|| AppError::invalid_token("validation failed"))?;

    let subject = match (&claims.sub, claims.token_type) {
        (Some(sub), TokenType::Access) => sub,
        _ => return Err(AppError::invalid_token("invalid payload")),
    };

    let user_id =
        Uuid::parse_str(subject).map_err(|_| AppError::invalid_token("invalid id in token"))?;

    let user = state
        .repos
        .users
        .find_by_id(user_id, true)
        .await?
        .ok_or_else(|| AppError::invalid_token("user not found"))?;

    Ok(CurrentUser {
        user,
        session_id: claims.jti,
    })
}

/// Require a valid access token
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    match authenticate(&state, request.headers()).await {
        Ok(current) => {
            request.extensions_mut().insert(current);
            Ok(next.run(request).await)
        }
        Err(err) => {
            if err.kind() == prodtrack_core::ErrorKind::InvalidToken {
                audit_log(&AuditEvent::InvalidToken {
                    reason: err.message().to_string(),
                    client: ClientInfo::from_headers(request.headers()),
                });
            }
            Err(err.into())
        }
    }
}

/// Authenticated and active principal from request extensions
fn active_user(request: &Request<Body>) -> Result<CurrentUser, AppError> {
    let current = request
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| AppError::invalid_token("no token provided"))?;

    if !current.user.is_active {
        return Err(AppError::inactive_user(Some(&current.user.id.to_string())));
    }
    Ok(current)
}

fn deny(request: &Request<Body>, user: &User, required: &str) -> ApiError {
    let resource = request.uri().path().to_string();
    audit_log(&AuditEvent::AccessDenied {
        user_id: user.id,
        resource: resource.clone(),
        required: required.to_string(),
        client: ClientInfo::from_headers(request.headers()),
    });
    AppError::permission_denied(Some(required), Some(&resource)).into()
}

/// Require an active principal
pub async fn require_active(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    active_user(&request)?;
    Ok(next.run(request).await)
}

/// Require an active superuser
pub async fn require_superuser(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let current = active_user(&request)?;
    if !current.user.is_superuser {
        return Err(deny(&request, &current.user, "superuser"));
    }
    Ok(next.run(request).await)
}

/// Type alias for permission gate futures
type GateFuture = Pin<Box<dyn Future<Output = Result<Response, ApiError>> + Send>>;

/// Middleware factory requiring one named permission
pub fn require_permission(
    permission: &'static str,
) -> impl Fn(Request<Body>, Next) -> GateFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let current = active_user(&request)?;

            if !rbac::has_permission(&current.user.access_profile(), permission) {
                return Err(deny(&request, &current.user, permission));
            }

            Ok(next.run(request).await)
        })
    }
}

/// Middleware factory requiring at least one of several permissions
pub fn require_any_permission(
    permissions: &'static [&'static str],
) -> impl Fn(Request<Body>, Next) -> GateFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let current = active_user(&request)?;

            if !rbac::has_any_permission(&current.user.access_profile(), permissions) {
                return Err(deny(&request, &current.user, &permissions.join(",")));
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("prdtracker_user=xyz"));

        assert_eq!(extract_token(&headers, "prdtracker_user").as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; prdtracker_user=xyz"),
        );

        assert_eq!(extract_token(&headers, "prdtracker_user").as_deref(), Some("xyz"));
        assert_eq!(extract_token(&headers, "missing"), None);
    }

    #[test]
    fn test_extract_token_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_token(&headers, "prdtracker_user"), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers, "prdtracker_user"), None);
    }

    mod rejections {
        use crate::auth::middleware::authenticate;
        use crate::state::AppState;
        use crate::{test_state, TEST_SECRET};
        use axum::http::{header, HeaderMap, HeaderValue};
        use jsonwebtoken::{encode, EncodingKey, Header};
        use prodtrack_core::{AppError, NewUser, User};
        use uuid::Uuid;

        fn bearer(token: &str) -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
            headers
        }

        async fn member(state: &AppState) -> User {
            state
                .repos
                .users
                .create(NewUser {
                    email: "member@x.com".to_string(),
                    username: "member".to_string(),
                    hashed_password: "unused".to_string(),
                    is_active: true,
                    is_superuser: false,
                })
                .await
                .unwrap()
        }

        async fn rejection(state: &AppState, token: &str) -> AppError {
            authenticate(state, &bearer(token))
                .await
                .expect_err("token must be rejected")
        }

        #[tokio::test]
        async fn test_refresh_token_is_invalid_payload() {
            let state = test_state(false);
            let user = member(&state).await;
            let refresh = state.tokens.issue_refresh(&user.id.to_string(), 60).unwrap();

            let err = rejection(&state, &refresh).await;
            assert_eq!(err.code(), "INVALID_TOKEN");
            assert_eq!(err.message(), "Invalid token: invalid payload");
        }

        #[tokio::test]
        async fn test_unknown_token_type_is_invalid_payload() {
            let state = test_state(false);
            let user = member(&state).await;
            let claims = serde_json::json!({
                "sub": user.id.to_string(),
                "type": "bogus",
                "exp": chrono::Utc::now().timestamp() + 60,
            });
            let token = encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
            )
            .unwrap();

            let err = rejection(&state, &token).await;
            assert_eq!(err.message(), "Invalid token: invalid payload");
        }

        #[tokio::test]
        async fn test_non_uuid_subject() {
            let state = test_state(false);
            let (token, _) = state.tokens.issue_access("not-a-uuid", 60).unwrap();

            let err = rejection(&state, &token).await;
            assert_eq!(err.code(), "INVALID_TOKEN");
            assert_eq!(err.message(), "Invalid token: invalid id in token");
        }

        #[tokio::test]
        async fn test_soft_deleted_subject() {
            let state = test_state(false);
            let user = member(&state).await;
            let (token, _) = state.tokens.issue_access(&user.id.to_string(), 60).unwrap();
            assert!(authenticate(&state, &bearer(&token)).await.is_ok());

            assert!(state.repos.users.soft_delete(user.id).await.unwrap());
            let err = rejection(&state, &token).await;
            assert_eq!(err.code(), "INVALID_TOKEN");
            assert_eq!(err.message(), "Invalid token: user not found");

            let (stranger, _) = state
                .tokens
                .issue_access(&Uuid::new_v4().to_string(), 60)
                .unwrap();
            assert_eq!(
                rejection(&state, &stranger).await.message(),
                "Invalid token: user not found"
            );
        }

        #[tokio::test]
        async fn test_bad_signature_fails_validation() {
            let state = test_state(false);
            let err = rejection(&state, "invalid.token.here").await;
            assert_eq!(err.message(), "Invalid token: validation failed");
        }
    }

    mod gates {
        use crate::auth::middleware::{auth_middleware, require_any_permission, require_permission};
        use crate::state::AppState;
        use crate::test_state;
        use axum::{
            body::Body,
            http::{header, Request, StatusCode},
            middleware,
            routing::get,
            Router,
        };
        use std::sync::Arc;
        use uuid::Uuid;
        use prodtrack_core::{NewPermission, NewRole, NewUser};
        use tower::ServiceExt;

        async fn principal(state: &AppState, grants: &[(&str, &str)], is_active: bool) -> String {
            let user = state
                .repos
                .users
                .create(NewUser {
                    email: format!("{}@x.com", Uuid::new_v4()),
                    username: Uuid::new_v4().to_string(),
                    hashed_password: "unused".to_string(),
                    is_active,
                    is_superuser: false,
                })
                .await
                .unwrap();

            if !grants.is_empty() {
                let role = state
                    .repos
                    .roles
                    .create(NewRole {
                        name: Uuid::new_v4().to_string(),
                        description: None,
                    })
                    .await
                    .unwrap();
                let mut ids = Vec::new();
                for (resource, action) in grants {
                    let permission = state
                        .repos
                        .permissions
                        .create(NewPermission::new(resource, action, None))
                        .await
                        .unwrap();
                    ids.push(permission.id);
                }
                state.repos.roles.set_permissions(role.id, &ids).await.unwrap();
                state.repos.users.set_roles(user.id, &[role.id]).await.unwrap();
            }

            let (token, _) = state.tokens.issue_access(&user.id.to_string(), 60).unwrap();
            token
        }

        fn app(state: Arc<AppState>) -> Router {
            Router::new()
                .route("/one", get(|| async { "ok" }))
                .route_layer(middleware::from_fn(require_permission("tasks:read")))
                .merge(
                    Router::new()
                        .route("/any", get(|| async { "ok" }))
                        .route_layer(middleware::from_fn(require_any_permission(&[
                            "tasks:update",
                            "projects:update",
                        ]))),
                )
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
                .with_state(state)
        }

        async fn status(app: &Router, uri: &str, token: &str) -> StatusCode {
            let request = Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            app.clone().oneshot(request).await.unwrap().status()
        }

        #[tokio::test]
        async fn test_single_permission_gate() {
            let state = test_state(false);
            let reader = principal(&state, &[("tasks", "read")], true).await;
            let nobody = principal(&state, &[], true).await;
            let app = app(state);

            assert_eq!(status(&app, "/one", &reader).await, StatusCode::OK);
            assert_eq!(status(&app, "/one", &nobody).await, StatusCode::FORBIDDEN);
        }

        #[tokio::test]
        async fn test_any_permission_gate() {
            let state = test_state(false);
            let editor = principal(&state, &[("projects", "update")], true).await;
            let reader = principal(&state, &[("tasks", "read")], true).await;
            let app = app(state);

            assert_eq!(status(&app, "/any", &editor).await, StatusCode::OK);
            assert_eq!(status(&app, "/any", &reader).await, StatusCode::FORBIDDEN);
        }

        #[tokio::test]
        async fn test_inactive_principal_fails_gate() {
            let state = test_state(false);
            let dormant = principal(&state, &[("tasks", "read")], false).await;
            let app = app(state);

            assert_eq!(status(&app, "/one", &dormant).await, StatusCode::FORBIDDEN);
        }

        #[tokio::test]
        async fn test_missing_token_is_unauthorized() {
            let app = app(test_state(false));
            let request = Request::builder().uri("/one").body(Body::empty()).unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
