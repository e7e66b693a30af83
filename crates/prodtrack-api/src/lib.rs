//! Productivity Tracker API - authentication and RBAC REST service
//!
//! Provides HTTP endpoints for registration, login, session tracking and
//! user, role and permission administration.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod kv;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod seed;
pub mod services;
pub mod state;
pub mod validation;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};

use crate::error::{not_found_fallback, panic_response, problem_responder};
use crate::handlers::health;
use crate::middleware::security_headers_middleware;
use crate::state::AppState;

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::detailed_health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .fallback(not_found_fallback)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(from_fn(security_headers_middleware))
                .layer(from_fn_with_state(state.clone(), problem_responder))
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .with_state(state)
}

/// CORS for the configured origins; cross-origin requests are refused when
/// none are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn make_span(request: &Request<Body>) -> Span {
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
    )
}

#[cfg(any(test, feature = "test-utils"))]
pub use testing::{create_router_for_testing, test_state, TEST_SECRET};

#[cfg(any(test, feature = "test-utils"))]
mod testing {
    use super::*;
    use crate::auth::password::{CredentialHasher, PasswordConfig};
    use crate::auth::session::SessionIndex;
    use crate::kv::MemoryKvStore;
    use prodtrack_core::memory::MemoryStore;
    use prodtrack_core::{AppConfig, Repositories};

    pub const TEST_SECRET: &str = "test-secret-key-for-integration-tests";

    /// State over in-memory repositories
    ///
    /// With `with_session_store` unset the session index is disconnected.
    pub fn test_state(with_session_store: bool) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.auth.secret_key = TEST_SECRET.to_string();
        config.app.debug = true;

        let ttl = config.auth.access_token_ttl_secs() as u64;
        let sessions = if with_session_store {
            SessionIndex::with_store(Arc::new(MemoryKvStore::new()), ttl)
        } else {
            SessionIndex::disconnected(ttl)
        };

        Arc::new(AppState::with_hasher(
            config,
            Repositories::from_store(Arc::new(MemoryStore::new())),
            sessions,
            CredentialHasher::new(PasswordConfig::fast()),
        ))
    }

    /// Router over a fresh [`test_state`] with session tracking
    pub fn create_router_for_testing() -> Router {
        create_router(test_state(true))
    }
}
