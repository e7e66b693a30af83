//! Authentication API handlers
//!
//! Registration, login, token refresh, logout and self-service profile
//! management. Login and refresh mint an access token first and only then
//! record its session; a failed session write never fails the request.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use prodtrack_core::{AppConfig, AppError, SameSitePolicy, User};
use serde_json::{Map, Value};
use std::sync::Arc;
use time::Duration as TimeDuration;
use uuid::Uuid;

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::jwt::TokenType;
use crate::auth::middleware::CurrentUser;
use crate::error::ApiResult;
use crate::models::{
    LoginRequest, LoginResponse, MessageResponse, PasswordChangeRequest, ProfileUpdateRequest,
    RefreshRequest, RegisterRequest, TokenResponse, UserResponse,
};
use crate::services::{AccountDraft, ProfileChanges, UserService};
use crate::state::AppState;
use crate::validation::ValidatedJson;

/// Access-token cookie with the configured attributes
fn session_cookie(config: &AppConfig, value: String, max_age: TimeDuration) -> Cookie<'static> {
    let same_site = match config.cookie.samesite {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    };

    Cookie::build((config.cookie.name.clone(), value))
        .path("/")
        .http_only(config.cookie.httponly)
        .secure(config.cookie.secure)
        .same_site(same_site)
        .max_age(max_age)
        .build()
}

fn access_cookie(config: &AppConfig, token: String) -> Cookie<'static> {
    let ttl = TimeDuration::seconds(config.auth.access_token_ttl_secs());
    session_cookie(config, token, ttl)
}

/// Expired copy of the access cookie; sent whether or not the request had one
fn cleared_cookie(config: &AppConfig) -> Cookie<'static> {
    session_cookie(config, String::new(), TimeDuration::ZERO)
}

/// Mint an access token and record its session, best effort
async fn open_session(
    state: &AppState,
    user: &User,
    client: &ClientInfo,
) -> ApiResult<String> {
    let ttl = state.config.auth.access_token_ttl_secs();
    let (token, session_id) = state.tokens.issue_access(&user.id.to_string(), ttl)?;

    let mut metadata = Map::new();
    metadata.insert("username".to_string(), Value::from(user.username.clone()));
    metadata.insert("user_agent".to_string(), Value::from(client.user_agent.clone()));
    metadata.insert("ip_address".to_string(), Value::from(client.ip_address.clone()));

    if state.sessions.is_connected()
        && !state
            .sessions
            .create_session(&session_id, user.id, Some(metadata), None)
            .await
    {
        tracing::warn!(user_id = %user.id, "Session was not recorded");
    }

    Ok(token)
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = UserResponse),
        (status = 409, description = "Email or username already exists", body = crate::error::ProblemDetails),
        (status = 422, description = "Invalid input", body = crate::error::ProblemDetails),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = UserService::from_state(&state)
        .create_user(
            AccountDraft {
                email: request.email,
                username: request.username,
                password: request.password,
            },
            false,
        )
        .await?;

    audit_log(&AuditEvent::Register {
        user_id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        client: ClientInfo::from_headers(&headers),
    });

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Login with username and password
///
/// Returns both tokens and sets the access token cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ProblemDetails),
        (status = 403, description = "Account inactive", body = crate::error::ProblemDetails),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let client = ClientInfo::from_headers(&headers);

    let user = match UserService::from_state(&state)
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(user) => user,
        Err(err) => {
            audit_log(&AuditEvent::LoginFailed {
                username: request.username.clone(),
                reason: "invalid credentials".to_string(),
                client,
            });
            return Err(err);
        }
    };

    if !user.is_active {
        audit_log(&AuditEvent::LoginFailed {
            username: request.username.clone(),
            reason: "inactive user".to_string(),
            client,
        });
        return Err(AppError::inactive_user(Some(&user.id.to_string())).into());
    }

    let access_token = open_session(&state, &user, &client).await?;
    let refresh_token = state
        .tokens
        .issue_refresh(&user.id.to_string(), state.config.auth.refresh_token_ttl_secs())?;

    audit_log(&AuditEvent::LoginSuccess {
        user_id: user.id,
        username: user.username.clone(),
        client,
    });

    let jar = jar.add(access_cookie(&state.config, access_token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            message: "Login successful".to_string(),
            user: user.into(),
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: state.config.auth.access_token_ttl_secs(),
        }),
    ))
}

/// Exchange a refresh token for a new access token
///
/// Opens a new session; the session of the previous access token is left
/// to expire on its own.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid refresh token", body = crate::error::ProblemDetails),
        (status = 403, description = "Account inactive", body = crate::error::ProblemDetails),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let client = ClientInfo::from_headers(&headers);
    let reject = |reason: &str| {
        audit_log(&AuditEvent::InvalidToken {
            reason: reason.to_string(),
            client: client.clone(),
        });
        AppError::invalid_token(reason)
    };

    let claims = state
        .tokens
        .verify(&request.refresh_token)
        .ok_or_else(|| reject("validation failed"))?;

    let subject = match (&claims.sub, claims.token_type) {
        (Some(sub), TokenType::Refresh) => sub,
        _ => return Err(reject("invalid payload").into()),
    };
    let user_id = Uuid::parse_str(subject).map_err(|_| reject("invalid id in token"))?;

    let user = state
        .repos
        .users
        .find_by_id(user_id, true)
        .await?
        .ok_or_else(|| reject("user not found"))?;

    if !user.is_active {
        return Err(AppError::inactive_user(Some(&user.id.to_string())).into());
    }

    let access_token = open_session(&state, &user, &client).await?;
    audit_log(&AuditEvent::TokenRefresh {
        user_id: user.id,
        client,
    });

    let jar = jar.add(access_cookie(&state.config, access_token.clone()));
    Ok((
        jar,
        Json(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
        }),
    ))
}

/// Logout the current session and clear the cookie
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(session_id) = &current.session_id {
        state.sessions.delete_session(session_id).await;
    }

    audit_log(&AuditEvent::Logout {
        user_id: current.user.id,
        session_id: current.session_id.clone(),
        client: ClientInfo::from_headers(&headers),
    });

    (
        jar.add(cleared_cookie(&state.config)),
        Json(MessageResponse::new("Logout successful")),
    )
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ProblemDetails),
        (status = 403, description = "Account inactive", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn me_handler(Extension(current): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(current.user.into())
}

/// Update the current user's email or username
#[utoipa::path(
    put,
    path = "/api/v1/auth/me",
    tag = "auth",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 409, description = "Email or username taken", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn update_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    ValidatedJson(request): ValidatedJson<ProfileUpdateRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state)
        .update_user(
            current.user.id,
            ProfileChanges {
                email: request.email,
                username: request.username,
                is_active: None,
            },
        )
        .await?;
    Ok(Json(user.into()))
}

/// Change the current user's password
#[utoipa::path(
    put,
    path = "/api/v1/auth/me/password",
    tag = "auth",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed", body = UserResponse),
        (status = 422, description = "Current password incorrect", body = crate::error::ProblemDetails),
    ),
    security(("bearer_auth" = []), ("cookie_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<PasswordChangeRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = UserService::from_state(&state)
        .change_password(current.user.id, &request.current_password, &request.new_password)
        .await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: user.id,
        client: ClientInfo::from_headers(&headers),
    });
    Ok(Json(user.into()))
}
