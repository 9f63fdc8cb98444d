//! # Error Handling
//!
//! Problem+json errors for the operator and health endpoints, carrying the
//! request trace ID and an optional `Retry-After` hint.
//!
//! Provider-facing webhook responses use their own `{"error": "..."}` body, see
//! [`crate::handlers::webhooks`].

use axum::{
    extract::rejection::QueryRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use utoipa::ToSchema;

use crate::repositories::RepositoryError;
use crate::telemetry;

/// Problem+json body returned by the operator API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    pub message: Box<str>,
    /// Field-level details for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Seconds to wait before retrying, mirrored in the `Retry-After` header
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::scoped_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace ID of the running request, or a short correlation ID outside one.
    fn scoped_trace_id() -> Option<Box<str>> {
        let trace_id = telemetry::current_trace_id().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("corr-{}", &id[..8])
        });
        Some(trace_id.into_boxed_str())
    }
}

/// True when the database rejected a write because of a unique index.
///
/// Idempotency claims, the webhook event log and account creation all turn a
/// lost insert race into "already exists" through this check.
pub fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let sqlx_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = sqlx_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error.code().is_some_and(|code| {
            let code: &str = &code;
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return conflict("Resource already exists");
        }

        match error {
            DbErr::RecordNotFound(record) => not_found(format!("Record not found: {record}")),
            DbErr::Conn(connection_err) => {
                tracing::error!(error = ?connection_err, "Database connection error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!(error = ?other, "Database error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(db) => db.into(),
            RepositoryError::UserNotFound(_) => not_found(error.to_string()),
            RepositoryError::DuplicateEmail(_) => conflict(error.to_string()),
            RepositoryError::InvalidCreditAmount(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                error.to_string(),
            ),
        }
    }
}

pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// 401 carrying the trace ID the auth middleware already assigned
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn conflict(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

/// 429 with a `Retry-After` hint
pub fn rate_limited(message: &str, retry_after_seconds: u64) -> ApiError {
    ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
        .with_retry_after(retry_after_seconds)
}

pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn builds_problem_body() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "bad limit");

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("bad limit"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = rate_limited("Too many connection attempts", 60).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn falls_back_to_correlation_id() {
        let error = conflict("Event is being processed");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn uses_request_trace_id_when_scoped() {
        let context = telemetry::TraceContext {
            trace_id: "req-123".to_string(),
        };
        let error = telemetry::with_trace_context(context, async { not_found("missing") }).await;

        assert_eq!(error.trace_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn maps_database_errors() {
        let api_error: ApiError = DbErr::RecordNotFound("webhook_event".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("webhook_event"));

        let api_error: ApiError = DbErr::Custom("boom".to_string()).into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!is_unique_violation(&DbErr::Custom("boom".to_string())));
    }

    #[test]
    fn maps_repository_errors() {
        let missing: ApiError = RepositoryError::UserNotFound(Uuid::nil()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let duplicate: ApiError = RepositoryError::DuplicateEmail("a@b.c".to_string()).into();
        assert_eq!(duplicate.status, StatusCode::CONFLICT);

        let invalid: ApiError = RepositoryError::InvalidCreditAmount(-5).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validation_error_keeps_field_details() {
        let field_errors = json!({ "limit": "must be between 1 and 500" });
        let error = validation_error("Invalid query", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }

    #[test]
    fn unauthorized_keeps_given_trace_id() {
        let error = unauthorized_with_trace_id(None, "trace-9".to_string());
        assert_eq!(error.message, Box::from("Authentication required"));
        assert_eq!(error.trace_id.as_deref(), Some("trace-9"));
    }
}
