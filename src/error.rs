//! # Error Handling
//!
//! Unified error handling for the Fleetsync API, implementing a consistent
//! problem+json response format with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// The request's trace id, or a short generated correlation id when the
    /// error is built outside a request scope.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::active_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// True when the database error is a unique constraint violation, across the
/// Postgres and sqlite backends we run against.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamError {
    /// Provider identifier (e.g., "samsara", "motive")
    pub provider: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream (truncated for security)
    pub body_snippet: Option<String>,
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

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(e) => {
                tracing::error!(error = ?e, "Database connection error");
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

/// Create a provider upstream error. All upstream HTTP failures surface as
/// 502 PROVIDER_ERROR with provider/status metadata in details.
pub fn provider_error(provider: String, status: u16, body: Option<String>) -> ApiError {
    let upstream = UpstreamError {
        provider: provider.clone(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        format!("Provider {} returned error status {}", provider, status),
    )
    .with_details(json!(upstream))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an invalid signature error (401) for webhook verification failures
pub fn invalid_signature(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Webhook signature verification failed");
    ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", msg)
}

/// Create an unsupported provider error (400)
pub fn unsupported_provider(slug: &str) -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        "UNSUPPORTED_PROVIDER",
        format!("Provider '{}' is not supported", slug),
    )
}

/// Create a connection-not-active error (409)
pub fn connection_not_active(status: &str) -> ApiError {
    ApiError::new(
        StatusCode::CONFLICT,
        "CONNECTION_NOT_ACTIVE",
        format!("Connection is not active (status: {})", status),
    )
}

/// Create a not-entitled error (403) for plan tier restrictions
pub fn not_entitled(sync_type: &str, tier: &str) -> ApiError {
    ApiError::new(
        StatusCode::FORBIDDEN,
        "NOT_ENTITLED",
        format!("Plan tier '{}' does not include {} sync", tier, sync_type),
    )
}

/// Create a not-entitled error (403) for tenants without any subscription
pub fn no_subscription() -> ApiError {
    ApiError::new(
        StatusCode::FORBIDDEN,
        "NOT_ENTITLED",
        "Tenant has no active subscription",
    )
}

/// Create a sync-in-progress error (429) when a duplicate sync is blocked
pub fn sync_in_progress(job_id: uuid::Uuid, retry_after_secs: u64) -> ApiError {
    ApiError::new(
        StatusCode::TOO_MANY_REQUESTS,
        "SYNC_IN_PROGRESS",
        "A sync of this type is already running for this connection",
    )
    .with_details(json!({ "job_id": job_id }))
    .with_retry_after(retry_after_secs)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_api_error_with_retry_after() {
        let error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "SYNC_IN_PROGRESS",
            "Sync already running",
        )
        .with_retry_after(300);

        assert_eq!(error.retry_after, Some(300));
    }

    #[test]
    fn test_from_anyhow() {
        let anyhow_error = anyhow::anyhow!("Something went wrong");
        let api_error: ApiError = anyhow_error.into();

        assert_eq!(api_error.code, Box::from("INTERNAL_SERVER_ERROR"));
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_provider_error_always_maps_to_502() {
        // All upstream statuses surface as 502 PROVIDER_ERROR, including 4xx.
        for upstream_status in [400u16, 401, 404, 429, 500, 503] {
            let error = provider_error(
                "samsara".to_string(),
                upstream_status,
                Some("upstream failure".to_string()),
            );

            assert_eq!(error.status, StatusCode::BAD_GATEWAY);
            assert_eq!(error.code, Box::from("PROVIDER_ERROR"));

            let details = error.details.as_ref().unwrap();
            let details_obj = details.as_object().unwrap();
            assert_eq!(details_obj.get("provider").unwrap(), "samsara");
            assert_eq!(details_obj.get("status").unwrap(), upstream_status);
        }
    }

    #[test]
    fn test_provider_error_truncates_body() {
        let long_body = "x".repeat(500);
        let error = provider_error("motive".to_string(), 500, Some(long_body));

        let details = error.details.unwrap();
        let snippet = details
            .as_object()
            .unwrap()
            .get("body_snippet")
            .unwrap()
            .as_str()
            .unwrap();
        assert!(snippet.chars().count() <= 203);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");

        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_retry_after_header() {
        let error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "SYNC_IN_PROGRESS",
            "Sync already running",
        )
        .with_retry_after(60);

        let response = error.into_response();

        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        assert!(error.trace_id.is_some());
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13); // "corr-" + 8 chars
    }

    #[test]
    fn test_database_error_mapping() {
        let db_error = sea_orm::DbErr::RecordNotFound("connection".to_string());
        let api_error: ApiError = db_error.into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
        assert!(api_error.message.contains("connection"));
    }

    #[test]
    fn test_domain_error_helpers() {
        let err = unsupported_provider("geotab");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, Box::from("UNSUPPORTED_PROVIDER"));
        assert!(err.message.contains("geotab"));

        let err = connection_not_active("pending");
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, Box::from("CONNECTION_NOT_ACTIVE"));
        assert!(err.message.contains("pending"));

        let err = not_entitled("hos_logs", "starter");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, Box::from("NOT_ENTITLED"));
        assert!(err.message.contains("hos_logs"));

        let job_id = uuid::Uuid::new_v4();
        let err = sync_in_progress(job_id, 300);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code, Box::from("SYNC_IN_PROGRESS"));
        assert_eq!(err.retry_after, Some(300));
        let details = err.details.unwrap();
        assert_eq!(
            details.as_object().unwrap().get("job_id").unwrap(),
            &json!(job_id)
        );

        let err = invalid_signature(None);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, Box::from("INVALID_SIGNATURE"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({
            "provider": "Provider slug is required"
        });

        let err = validation_error("Validation failed", field_errors.clone());

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(err.details, Some(Box::new(field_errors)));
    }
}
