//! Security audit logging
//!
//! Authentication and authorization events are emitted at INFO level on the
//! `audit` target so they can be routed apart from application logs. Each
//! record carries the serialized event plus its principal and client address
//! as top-level fields. Passwords and tokens are never part of an event.

use axum::http::{header, HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Client information attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: Uuid,
        username: String,
        client: ClientInfo,
    },

    LoginFailed {
        username: String,
        reason: String,
        client: ClientInfo,
    },

    Register {
        user_id: Uuid,
        username: String,
        email: String,
        client: ClientInfo,
    },

    Logout {
        user_id: Uuid,
        session_id: Option<String>,
        client: ClientInfo,
    },

    LogoutAll {
        user_id: Uuid,
        sessions_deleted: u64,
        client: ClientInfo,
    },

    TokenRefresh {
        user_id: Uuid,
        client: ClientInfo,
    },

    PasswordChange {
        user_id: Uuid,
        client: ClientInfo,
    },

    /// Authenticated principal lacked a permission, role or superuser flag
    AccessDenied {
        user_id: Uuid,
        resource: String,
        required: String,
        client: ClientInfo,
    },

    InvalidToken {
        reason: String,
        client: ClientInfo,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailed { .. } => "Login failed",
            AuditEvent::Register { .. } => "User registered",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::LogoutAll { .. } => "User logout from all devices",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::Register { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::LogoutAll { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::PasswordChange { user_id, .. }
            | AuditEvent::AccessDenied { user_id, .. } => Some(*user_id),
            AuditEvent::LoginFailed { .. } | AuditEvent::InvalidToken { .. } => None,
        }
    }

    fn client(&self) -> &ClientInfo {
        match self {
            AuditEvent::LoginSuccess { client, .. }
            | AuditEvent::LoginFailed { client, .. }
            | AuditEvent::Register { client, .. }
            | AuditEvent::Logout { client, .. }
            | AuditEvent::LogoutAll { client, .. }
            | AuditEvent::TokenRefresh { client, .. }
            | AuditEvent::PasswordChange { client, .. }
            | AuditEvent::AccessDenied { client, .. }
            | AuditEvent::InvalidToken { client, .. } => client,
        }
    }
}

/// Emit an audit event on the `audit` target
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let client = event.client();

    info!(
        target: "audit",
        timestamp = %Utc::now(),
        event = %event_json,
        user_id = ?event.user_id(),
        ip_address = ?client.ip_address,
        "{}",
        event.summary()
    );
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(str::to_string)
}
