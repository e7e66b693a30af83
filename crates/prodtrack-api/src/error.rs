//! API error handling
//!
//! Every failure leaves the service as an RFC 7807 problem document:
//! `{type, title, status, detail, instance}`, plus `context` in debug mode.
//! [`ApiError`] renders the document and stashes it in the response
//! extensions; [`problem_responder`] then fills `instance` from the request
//! URI and attaches the context when debug is on.

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        OriginalUri, Request, State,
    },
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use prodtrack_core::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::state::AppState;

/// One invalid input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldViolation {
    /// Field path, segments joined with ` -> `
    pub field: String,
    /// Human readable message
    pub msg: String,
    /// Violation kind (e.g. `missing`, `too_short`)
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldViolation {
    /// Build a violation with a humanized message
    pub fn new(field: impl Into<String>, raw_message: &str, kind: impl Into<String>) -> Self {
        let field = field.into();
        let kind = kind.into();
        let msg = friendly_validation_message(&field, raw_message, &kind);
        Self { field, msg, kind }
    }
}

/// Problem `detail`: a message, or per-field problems for validation errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ProblemDetail {
    Message(String),
    Fields(Vec<FieldViolation>),
}

/// Problem Details response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProblemDetails {
    /// Machine-readable problem type
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: ProblemDetail,
    /// Request URI the problem occurred on
    pub instance: String,
    /// Diagnostic context, only in debug mode
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub context: Option<Value>,
}

/// Rendered problem carried in response extensions
#[derive(Debug, Clone)]
struct RenderedProblem {
    problem: ProblemDetails,
    context: Option<Value>,
}

/// Boundary error
///
/// Rendering precedence follows variant order: structured application
/// errors, HTTP protocol errors, validation, storage, then everything else.
/// Converting an [`AppError`] of kind `Database` lands in `Storage`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    App(AppError),

    #[error("HTTP {status}: {detail}")]
    Http { status: StatusCode, detail: String },

    #[error("Validation failed: {0:?}")]
    Validation(Vec<FieldViolation>),

    #[error(transparent)]
    Storage(AppError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        if err.kind() == ErrorKind::Database {
            Self::Storage(err)
        } else {
            Self::App(err)
        }
    }
}

impl ApiError {
    pub fn http(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::Http {
            status,
            detail: detail.into(),
        }
    }

    /// HTTP status this error renders with
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::App(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Http { status, .. } => *status,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(err) => {
                classify_storage(err.original_error().unwrap_or(err.message())).status
            }
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn render(&self) -> RenderedProblem {
        match self {
            ApiError::App(err) => {
                if err.status_code() >= 500 {
                    tracing::error!(code = err.code(), context = ?err.context(), "{}", err.message());
                } else {
                    tracing::warn!(code = err.code(), context = ?err.context(), "{}", err.message());
                }
                RenderedProblem {
                    problem: ProblemDetails {
                        problem_type: err.code().to_string(),
                        title: err.kind().title().to_string(),
                        status: err.status_code(),
                        detail: ProblemDetail::Message(err.user_message().to_string()),
                        instance: String::new(),
                        context: None,
                    },
                    context: context_value(err),
                }
            }
            ApiError::Http { status, detail } => {
                tracing::warn!(status = status.as_u16(), "{detail}");
                let title = status.canonical_reason().unwrap_or("HTTP Error");
                RenderedProblem {
                    problem: ProblemDetails {
                        problem_type: slug(title),
                        title: title.to_string(),
                        status: status.as_u16(),
                        detail: ProblemDetail::Message(detail.clone()),
                        instance: String::new(),
                        context: None,
                    },
                    context: None,
                }
            }
            ApiError::Validation(violations) => {
                tracing::warn!(?violations, "Validation error");
                RenderedProblem {
                    problem: ProblemDetails {
                        problem_type: "validation-error".to_string(),
                        title: "Validation Error".to_string(),
                        status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                        detail: ProblemDetail::Fields(violations.clone()),
                        instance: String::new(),
                        context: None,
                    },
                    context: None,
                }
            }
            ApiError::Storage(err) => {
                tracing::error!(
                    code = err.code(),
                    context = ?err.context(),
                    "Database error: {}",
                    err.message()
                );
                RenderedProblem {
                    problem: storage_problem(err.original_error().unwrap_or(err.message())),
                    context: context_value(err),
                }
            }
            ApiError::Unexpected(text) => {
                tracing::error!("Unhandled error: {text}");
                RenderedProblem {
                    problem: ProblemDetails {
                        problem_type: "internal-server-error".to_string(),
                        title: "Internal Server Error".to_string(),
                        status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        detail: ProblemDetail::Message(
                            "An unexpected error occurred. Our team has been notified.".to_string(),
                        ),
                        instance: String::new(),
                        context: None,
                    },
                    context: None,
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let rendered = self.render();

        let mut response = (status, Json(rendered.problem.clone())).into_response();
        response.extensions_mut().insert(rendered);
        response
    }
}

fn context_value(err: &AppError) -> Option<Value> {
    if err.context().is_empty() {
        None
    } else {
        serde_json::to_value(err.context()).ok()
    }
}

fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// ============================================================================
// Storage classification
// ============================================================================

/// Classified storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageClass {
    pub status: StatusCode,
    pub code: &'static str,
    pub title: &'static str,
    pub message: &'static str,
}

/// Map raw storage error text onto a client-safe class
pub fn classify_storage(error_text: &str) -> StorageClass {
    let text = error_text.to_lowercase();

    if text.contains("duplicate key") || text.contains("unique constraint") {
        StorageClass {
            status: StatusCode::CONFLICT,
            code: "duplicate-entry",
            title: "Duplicate Entry",
            message: "This information already exists. Please use different details.",
        }
    } else if text.contains("foreign key") {
        StorageClass {
            status: StatusCode::CONFLICT,
            code: "foreign-key-violation",
            title: "Foreign Key Violation",
            message: "This operation cannot be completed due to related data.",
        }
    } else if text.contains("connection") || text.contains("timeout") || text.contains("timed out") {
        StorageClass {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "database-connection-error",
            title: "Database Connection Error",
            message: "Unable to connect to the database. Please try again.",
        }
    } else {
        StorageClass {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "database-error",
            title: "Database Error",
            message: "We're experiencing technical difficulties. Please try again later.",
        }
    }
}

fn storage_problem(error_text: &str) -> ProblemDetails {
    let class = classify_storage(error_text);
    ProblemDetails {
        problem_type: class.code.to_string(),
        title: class.title.to_string(),
        status: class.status.as_u16(),
        detail: ProblemDetail::Message(class.message.to_string()),
        instance: String::new(),
        context: None,
    }
}

// ============================================================================
// Validation messages
// ============================================================================

/// Display name for a field path: last segment, underscores to spaces,
/// title-cased
pub fn humanize_field(path: &str) -> String {
    let last = path.rsplit(" -> ").next().unwrap_or(path);
    last.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// User-facing message for one validation failure
pub fn friendly_validation_message(field: &str, raw_message: &str, kind: &str) -> String {
    let display = humanize_field(field);

    match kind {
        "missing" | "value_error.missing" => return format!("{display} is required."),
        "type_error.integer" | "type_error.float" => return format!("{display} must be a number."),
        "type_error.boolean" => return format!("{display} must be true or false."),
        "value_error.email" => return "Please enter a valid email address.".to_string(),
        "value_error.url" => return format!("{display} must be a valid URL."),
        _ => {}
    }

    let lowered = raw_message.to_lowercase();
    if kind.contains("too_short") || lowered.contains("min_length") {
        format!("{display} is too short.")
    } else if kind.contains("too_long") || lowered.contains("max_length") {
        format!("{display} is too long.")
    } else if kind.contains("greater_than") {
        format!("{display} must be greater than the minimum allowed value.")
    } else if kind.contains("less_than") {
        format!("{display} must be less than the maximum allowed value.")
    } else {
        format!("{display}: {raw_message}")
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let text = err.body_text();
                match missing_field(&text) {
                    Some(field) => {
                        ApiError::Validation(vec![FieldViolation::new(field, "Field required", "missing")])
                    }
                    None => ApiError::Validation(vec![FieldViolation::new(
                        "body",
                        &text,
                        "value_error.jsondecode",
                    )]),
                }
            }
            other => ApiError::http(other.status(), other.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(err) => ApiError::Validation(vec![
                FieldViolation::new("path", &err.body_text(), "value_error.path"),
            ]),
            other => ApiError::http(other.status(), other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(vec![FieldViolation::new(
            "query",
            &rejection.body_text(),
            "value_error.query",
        )])
    }
}

/// Field named in a serde "missing field `x`" message
fn missing_field(text: &str) -> Option<String> {
    let start = text.find("missing field `")? + "missing field `".len();
    let rest = &text[start..];
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations: Vec<FieldViolation> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |err| validator_violation(field.as_ref(), err))
            })
            .collect();
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::Validation(violations)
    }
}

fn validator_violation(field: &str, err: &validator::ValidationError) -> FieldViolation {
    let number = |key: &str| err.params.get(key).and_then(Value::as_f64);
    let value = err.params.get("value");

    let kind = match err.code.as_ref() {
        "length" => {
            let len = value
                .and_then(Value::as_str)
                .map(|s| s.chars().count() as f64);
            match (len, number("min")) {
                (Some(len), Some(min)) if len < min => "too_short",
                _ => "too_long",
            }
        }
        "range" => match (value.and_then(Value::as_f64), number("min")) {
            (Some(v), Some(min)) if v < min => "greater_than",
            _ => "less_than",
        },
        "email" => "value_error.email",
        "url" => "value_error.url",
        "required" => "missing",
        other => other,
    };

    let raw = err
        .message
        .as_deref()
        .map(str::to_string)
        .unwrap_or_else(|| format!("failed {} validation", err.code));

    FieldViolation::new(field, &raw, kind)
}

impl From<crate::auth::password::PasswordError> for ApiError {
    fn from(err: crate::auth::password::PasswordError) -> Self {
        ApiError::Unexpected(err.to_string())
    }
}

impl From<crate::auth::jwt::JwtError> for ApiError {
    fn from(err: crate::auth::jwt::JwtError) -> Self {
        ApiError::Unexpected(err.to_string())
    }
}

// ============================================================================
// Responder middleware
// ============================================================================

/// Fill `instance` and debug context on problem responses
pub async fn problem_responder(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let instance = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.to_string())
        .unwrap_or_else(|| request.uri().to_string());

    let mut response = next.run(request).await;

    let Some(rendered) = response.extensions_mut().remove::<RenderedProblem>() else {
        return response;
    };

    let mut problem = rendered.problem;
    problem.instance = instance;
    if state.config.app.debug {
        problem.context = rendered.context;
    }

    match serde_json::to_vec(&problem) {
        Ok(bytes) => {
            response.headers_mut().remove(header::CONTENT_LENGTH);
            *response.body_mut() = Body::from(bytes);
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize problem document"),
    }
    response
}

/// Problem response for panics caught by `CatchPanicLayer`
pub fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Unexpected(format!("panic: {message}")).into_response()
}

/// Problem response for unmatched routes
pub async fn not_found_fallback(uri: axum::http::Uri) -> ApiError {
    ApiError::http(StatusCode::NOT_FOUND, format!("No route for {}", uri.path()))
}
