//! Health check handlers

use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Liveness response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub app_name: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Dependency status
#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            error: None,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            error: Some(error.into()),
        }
    }

    fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthComponents {
    pub database: ComponentStatus,
    pub redis: ComponentStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DetailedHealthResponse {
    /// `healthy` when every component is, otherwise `degraded`
    pub status: String,
    pub app_name: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        app_name: state.config.app.name.clone(),
        version: state.config.app.version.clone(),
        timestamp: Utc::now(),
    })
}

/// Dependency check
///
/// Always answers 200; a failing database or missing session store shows up
/// as `degraded`.
#[utoipa::path(
    get,
    path = "/health/detailed",
    tag = "health",
    responses(
        (status = 200, description = "Component status", body = DetailedHealthResponse)
    )
)]
pub async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> Json<DetailedHealthResponse> {
    let (database, redis) = futures::join!(state.repos.users.ping(), state.sessions.ping());

    let database = match database {
        Ok(()) => ComponentStatus::healthy(),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            ComponentStatus::unhealthy(e.user_message())
        }
    };

    let redis = match redis {
        Ok(()) => ComponentStatus::healthy(),
        Err(e) => {
            tracing::warn!(error = %e, "Session store health check failed");
            ComponentStatus::unhealthy(e)
        }
    };

    let status = if database.is_healthy() && redis.is_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(DetailedHealthResponse {
        status: status.to_string(),
        app_name: state.config.app.name.clone(),
        version: state.config.app.version.clone(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_secs(),
        components: HealthComponents { database, redis },
    })
}
