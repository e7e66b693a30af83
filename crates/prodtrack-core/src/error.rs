//! Structured application errors
//!
//! Every failure that reaches the HTTP boundary is an [`AppError`]: a closed
//! [`ErrorKind`] tag plus a technical message for logs, a message that is safe
//! to show an end user, a stable machine code and a diagnostic context map.
//! The boundary renders it by matching on [`AppError::kind`].

use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Free-form diagnostic key/value pairs attached to an error
pub type ErrorContext = BTreeMap<String, Value>;

/// Closed set of application error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCredentials,
    InvalidToken,
    TokenExpired,
    InactiveUser,
    PermissionDenied,
    ResourceNotFound,
    ResourceAlreadyExists,
    Validation,
    PasswordMismatch,
    BusinessLogic,
    Database,
    RateLimitExceeded,
    ExternalService,
    Internal,
}

impl ErrorKind {
    /// HTTP status carried by this kind
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidCredentials | Self::InvalidToken | Self::TokenExpired => 401,
            Self::InactiveUser | Self::PermissionDenied => 403,
            Self::ResourceNotFound => 404,
            Self::ResourceAlreadyExists => 409,
            Self::Validation | Self::PasswordMismatch => 422,
            Self::BusinessLogic => 400,
            Self::RateLimitExceeded => 429,
            Self::Database | Self::Internal => 500,
            Self::ExternalService => 503,
        }
    }

    /// Default machine-readable code
    pub fn default_code(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InactiveUser => "INACTIVE_USER",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::ResourceAlreadyExists => "RESOURCE_ALREADY_EXISTS",
            Self::Validation => "VALIDATION_ERROR",
            Self::PasswordMismatch => "PASSWORD_MISMATCH",
            Self::BusinessLogic => "BUSINESS_LOGIC_ERROR",
            Self::Database => "DATABASE_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Short human-readable title used in problem documents
    pub fn title(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid Credentials",
            Self::InvalidToken => "Invalid Token",
            Self::TokenExpired => "Token Expired",
            Self::InactiveUser => "Inactive User",
            Self::PermissionDenied => "Permission Denied",
            Self::ResourceNotFound => "Resource Not Found",
            Self::ResourceAlreadyExists => "Resource Already Exists",
            Self::Validation => "Validation Error",
            Self::PasswordMismatch => "Password Mismatch",
            Self::BusinessLogic => "Business Logic Error",
            Self::Database => "Database Error",
            Self::RateLimitExceeded => "Rate Limit Exceeded",
            Self::ExternalService => "External Service Error",
            Self::Internal => "Internal Server Error",
        }
    }
}

/// Structured application error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AppError {
    kind: ErrorKind,
    code: Cow<'static, str>,
    message: String,
    user_message: String,
    context: ErrorContext,
}

impl AppError {
    /// Build an error of the given kind with its default code
    pub fn new(kind: ErrorKind, message: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Cow::Borrowed(kind.default_code()),
            message: message.into(),
            user_message: user_message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Override the machine code (e.g. `EMAIL_ALREADY_EXISTS`)
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Cow::Borrowed(code);
        self
    }

    /// Override the user-facing message
    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    /// Attach a diagnostic context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Technical message, for logs only
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    // ------------------------------------------------------------------
    // Authentication & authorization
    // ------------------------------------------------------------------

    pub fn invalid_credentials(username: Option<&str>) -> Self {
        let err = Self::new(
            ErrorKind::InvalidCredentials,
            format!("Invalid credentials for user: {}", username.unwrap_or("unknown")),
            "Invalid email or password. Please check your credentials and try again.",
        );
        match username {
            Some(name) => err.with_context("username", name),
            None => err,
        }
    }

    pub fn invalid_token(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidToken,
            format!("Invalid token: {reason}"),
            "Your session is invalid. Please log in again.",
        )
    }

    pub fn token_expired() -> Self {
        Self::new(
            ErrorKind::TokenExpired,
            "Token has expired",
            "Your session has expired. Please log in again.",
        )
    }

    pub fn inactive_user(user_id: Option<&str>) -> Self {
        let err = Self::new(
            ErrorKind::InactiveUser,
            format!("User account is inactive: {}", user_id.unwrap_or("unknown")),
            "Your account is inactive. Please contact support.",
        );
        match user_id {
            Some(id) => err.with_context("user_id", id),
            None => err,
        }
    }

    pub fn permission_denied(permission: Option<&str>, resource: Option<&str>) -> Self {
        let mut message = format!(
            "Permission denied: {}",
            permission.unwrap_or("unknown permission")
        );
        if let Some(resource) = resource {
            message.push_str(&format!(" on {resource}"));
        }

        let mut err = Self::new(
            ErrorKind::PermissionDenied,
            message,
            "You don't have permission to perform this action.",
        );
        if let Some(permission) = permission {
            err = err.with_context("permission", permission);
        }
        if let Some(resource) = resource {
            err = err.with_context("resource", resource);
        }
        err
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub fn not_found(resource_type: &str, resource_id: Option<&str>) -> Self {
        let mut message = format!("{resource_type} not found");
        if let Some(id) = resource_id {
            message.push_str(&format!(": {id}"));
        }

        let err = Self::new(
            ErrorKind::ResourceNotFound,
            message,
            format!(
                "The {} you're looking for doesn't exist.",
                resource_type.to_lowercase()
            ),
        )
        .with_context("resource_type", resource_type);

        match resource_id {
            Some(id) => err.with_context("resource_id", id),
            None => err,
        }
    }

    pub fn already_exists(resource_type: &str, field: &str, value: &str) -> Self {
        Self::new(
            ErrorKind::ResourceAlreadyExists,
            format!("{resource_type} already exists: {field}='{value}'"),
            format!(
                "A {} with this {field} already exists.",
                resource_type.to_lowercase()
            ),
        )
        .with_context("resource_type", resource_type)
        .with_context("field", field)
        .with_context("value", value)
    }

    pub fn email_already_exists(email: &str) -> Self {
        Self::already_exists("User", "email", email)
            .with_code("EMAIL_ALREADY_EXISTS")
            .with_user_message(
                "An account with this email address already exists. Please use a different email or try logging in.",
            )
    }

    pub fn username_already_exists(username: &str) -> Self {
        Self::already_exists("User", "username", username)
            .with_code("USERNAME_ALREADY_EXISTS")
            .with_user_message("This username is already taken. Please choose a different username.")
    }

    // ------------------------------------------------------------------
    // Validation & business rules
    // ------------------------------------------------------------------

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        let err = Self::new(
            ErrorKind::Validation,
            message,
            "The information provided is invalid.",
        );
        match field {
            Some(field) => err.with_context("field", field),
            None => err,
        }
    }

    pub fn invalid_password(reason: &str) -> Self {
        Self::validation(format!("Invalid password: {reason}"), Some("password"))
            .with_code("INVALID_PASSWORD")
            .with_user_message(
                "Password doesn't meet security requirements. Please choose a stronger password.",
            )
    }

    pub fn password_mismatch() -> Self {
        Self::new(
            ErrorKind::PasswordMismatch,
            "Current password is incorrect",
            "The current password you entered is incorrect.",
        )
    }

    pub fn business_logic(message: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessLogic, message, user_message)
    }

    // ------------------------------------------------------------------
    // Infrastructure
    // ------------------------------------------------------------------

    /// Storage-layer failure. The original error text is kept in context and
    /// never shown to clients.
    pub fn database(message: impl fmt::Display, original: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Database,
            format!("Database error: {message}"),
            "We're experiencing technical difficulties. Please try again later.",
        )
        .with_context("original_error", original.to_string())
    }

    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        let err = Self::new(
            ErrorKind::RateLimitExceeded,
            "Rate limit exceeded",
            "Too many requests. Please wait a moment and try again.",
        );
        match retry_after {
            Some(secs) => err.with_context("retry_after", secs),
            None => err,
        }
    }

    pub fn external_service(service: &str, message: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ExternalService,
            format!("External service error ({service}): {message}"),
            "We're having trouble connecting to an external service. Please try again later.",
        )
        .with_context("service", service)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Internal,
            message,
            "An unexpected error occurred. Our team has been notified.",
        )
    }

    /// Original storage error text, when this is a database error
    pub fn original_error(&self) -> Option<&str> {
        self.context.get("original_error").and_then(Value::as_str)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::database("query failed", err)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_kind() {
        assert_eq!(AppError::invalid_token("x").status_code(), 401);
        assert_eq!(AppError::token_expired().status_code(), 401);
        assert_eq!(AppError::inactive_user(None).status_code(), 403);
        assert_eq!(AppError::permission_denied(Some("a"), None).status_code(), 403);
        assert_eq!(AppError::not_found("Role", None).status_code(), 404);
        assert_eq!(AppError::already_exists("Role", "name", "x").status_code(), 409);
        assert_eq!(AppError::validation("bad", None).status_code(), 422);
        assert_eq!(AppError::password_mismatch().status_code(), 422);
        assert_eq!(AppError::business_logic("a", "b").status_code(), 400);
        assert_eq!(AppError::database("a", "b").status_code(), 500);
        assert_eq!(AppError::rate_limited(Some(3)).status_code(), 429);
        assert_eq!(AppError::external_service("redis", "down").status_code(), 503);
    }

    #[test]
    fn test_code_override_keeps_kind() {
        let err = AppError::email_already_exists("a@b.com");
        assert_eq!(err.kind(), ErrorKind::ResourceAlreadyExists);
        assert_eq!(err.code(), "EMAIL_ALREADY_EXISTS");
        assert_eq!(err.context()["field"], "email");
    }

    #[test]
    fn test_not_found_messages() {
        let err = AppError::not_found("Permission", Some("42"));
        assert_eq!(err.message(), "Permission not found: 42");
        assert_eq!(
            err.user_message(),
            "The permission you're looking for doesn't exist."
        );
    }

    #[test]
    fn test_display_uses_code_and_technical_message() {
        let err = AppError::invalid_token("user not found");
        assert_eq!(err.to_string(), "[INVALID_TOKEN] Invalid token: user not found");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_database_error_hides_original_from_user() {
        let err = AppError::database("insert failed", "duplicate key value violates unique constraint");
        assert!(!err.user_message().contains("duplicate"));
        assert_eq!(
            err.original_error(),
            Some("duplicate key value violates unique constraint")
        );
    }

    #[test]
    fn test_permission_denied_context() {
        let err = AppError::permission_denied(Some("users:read"), Some("user"));
        assert_eq!(err.message(), "Permission denied: users:read on user");
        assert_eq!(err.context()["permission"], "users:read");
        assert_eq!(err.context()["resource"], "user");
    }
}
