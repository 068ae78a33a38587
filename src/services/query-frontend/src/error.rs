//! Error handling for the Query Frontend Service
//!
//! Every failure that can surface from the pipeline is funneled through
//! [`AppError`], which knows its HTTP status, its stable error code, and the
//! coarse [`ErrorCategory`] used when shaping degraded query responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cmms_shared::ErrorCategory;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types for the query frontend.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("LLM provider error: {0}")]
    LlmError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Request queue full: {0}")]
    QueueFull(String),

    #[error("Queued request timed out: {0}")]
    QueueTimeout(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::LlmError(_) => "LLM_ERROR",
            AppError::AuthenticationError(_) => "AUTHENTICATION_ERROR",
            AppError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            AppError::QueueFull(_) => "QUEUE_FULL",
            AppError::QueueTimeout(_) => "QUEUE_TIMEOUT",
            AppError::CircuitOpen(_) => "CIRCUIT_OPEN",
            AppError::NetworkError(_) => "NETWORK_ERROR",
            AppError::TimeoutError(_) => "TIMEOUT_ERROR",
            AppError::ParseError(_) => "PARSE_ERROR",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::LlmError(_) => StatusCode::BAD_GATEWAY,
            AppError::AuthenticationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::QueueTimeout(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            AppError::TimeoutError(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::ParseError(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Coarse category used for response shaping and recovery guidance.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::ConfigurationError(_) => ErrorCategory::ApiConfig,
            AppError::DatabaseError(_) => ErrorCategory::Database,
            AppError::LlmError(_) => ErrorCategory::ServerError,
            AppError::AuthenticationError(_) => ErrorCategory::Auth,
            AppError::RateLimitExceeded(_) | AppError::QueueFull(_) | AppError::QueueTimeout(_) => {
                ErrorCategory::RateLimit
            }
            AppError::CircuitOpen(_) => ErrorCategory::ServerError,
            AppError::NetworkError(_) | AppError::TimeoutError(_) => ErrorCategory::Network,
            AppError::ParseError(_) | AppError::ValidationError(_) | AppError::BadRequest(_) => {
                ErrorCategory::Parsing
            }
            AppError::NotFound(_) => ErrorCategory::Unknown,
            AppError::ExternalServiceError(_) | AppError::ServiceUnavailable(_) => {
                ErrorCategory::ServerError
            }
            AppError::InternalServerError(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a later retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Check if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Error response body returned to HTTP clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            code: status.as_u16().to_string(),
            category: self.category().as_str().to_string(),
            details: None,
            timestamp: chrono::Utc::now(),
            request_id: None,
        };

        // Server-side faults are logged loudly, throttling and client
        // mistakes at lower levels.
        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                tracing::error!(error = %self, code = self.error_code(), "request failed");
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
                tracing::warn!(error = %self, code = self.error_code(), "request rejected");
            }
            _ => {
                tracing::info!(error = %self, code = self.error_code(), "request error");
            }
        }

        (status, Json(error_response)).into_response()
    }
}

impl From<cmms_database::DatabaseError> for AppError {
    fn from(err: cmms_database::DatabaseError) -> Self {
        use cmms_database::DatabaseError as DbErr;
        match err {
            DbErr::Connection(msg) => AppError::ServiceUnavailable(format!("database: {}", msg)),
            DbErr::Unavailable(msg) => AppError::ServiceUnavailable(format!("database: {}", msg)),
            DbErr::Rejected(msg) => AppError::ValidationError(msg),
            DbErr::Query(msg) => AppError::DatabaseError(msg),
            DbErr::Decode(msg) => AppError::DatabaseError(msg),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::TimeoutError(format!("HTTP request timeout: {}", err))
        } else if err.is_connect() {
            AppError::NetworkError(format!("Connection failed: {}", err))
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => AppError::AuthenticationError(format!("Upstream rejected credentials: {}", err)),
                429 => AppError::RateLimitExceeded(format!("Upstream rate limit: {}", err)),
                500..=599 => AppError::ExternalServiceError(format!("Upstream error {}: {}", status, err)),
                _ => AppError::ExternalServiceError(format!("HTTP error {}: {}", status, err)),
            }
        } else {
            AppError::NetworkError(format!("Request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(format!("JSON error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AppError::TimeoutError(format!("Operation timed out: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                AppError::NetworkError(format!("IO error: {}", err))
            }
            ErrorKind::TimedOut => AppError::TimeoutError(format!("IO timeout: {}", err)),
            _ => AppError::InternalServerError(format!("IO error: {}", err)),
        }
    }
}

/// Extension trait for attaching context when converting errors.
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            let base = e.into();
            match base {
                AppError::InternalServerError(msg) => {
                    AppError::InternalServerError(format!("{}: {}", context, msg))
                }
                AppError::DatabaseError(msg) => {
                    AppError::DatabaseError(format!("{}: {}", context, msg))
                }
                AppError::ExternalServiceError(msg) => {
                    AppError::ExternalServiceError(format!("{}: {}", context, msg))
                }
                other => other,
            }
        })
    }

    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.with_context(&f())
    }
}

// Convenience constructors used throughout the handlers.

pub fn bad_request(message: &str) -> AppError {
    AppError::BadRequest(message.to_string())
}

pub fn not_found(resource: &str) -> AppError {
    AppError::NotFound(format!("{} not found", resource))
}

pub fn validation_error(message: &str) -> AppError {
    AppError::ValidationError(message.to_string())
}

pub fn internal_error(message: &str) -> AppError {
    AppError::InternalServerError(message.to_string())
}

pub fn service_unavailable(message: &str) -> AppError {
    AppError::ServiceUnavailable(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::DatabaseError("test".to_string()).error_code(),
            "DATABASE_ERROR"
        );
        assert_eq!(
            AppError::CircuitOpen("llm".to_string()).error_code(),
            "CIRCUIT_OPEN"
        );
        assert_eq!(
            AppError::QueueFull("rate".to_string()).error_code(),
            "QUEUE_FULL"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RateLimitExceeded("test".to_string()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::CircuitOpen("test".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::TimeoutError("test".to_string()).status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            AppError::ConfigurationError("key".into()).category(),
            ErrorCategory::ApiConfig
        );
        assert_eq!(
            AppError::QueueTimeout("expired".into()).category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            AppError::TimeoutError("slow".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            AppError::ValidationError("bad sql".into()).category(),
            ErrorCategory::Parsing
        );
        assert_eq!(
            AppError::AuthenticationError("401".into()).category(),
            ErrorCategory::Auth
        );
    }

    #[test]
    fn test_retryable_follows_category() {
        assert!(AppError::NetworkError("down".into()).is_retryable());
        assert!(AppError::RateLimitExceeded("429".into()).is_retryable());
        assert!(AppError::ServiceUnavailable("503".into()).is_retryable());
        assert!(!AppError::ConfigurationError("key".into()).is_retryable());
        assert!(!AppError::DatabaseError("syntax".into()).is_retryable());
        assert!(!AppError::AuthenticationError("403".into()).is_retryable());
    }

    #[test]
    fn test_client_server_split() {
        assert!(AppError::BadRequest("test".into()).is_client_error());
        assert!(AppError::NotFound("test".into()).is_client_error());
        assert!(AppError::InternalServerError("test".into()).is_server_error());
        assert!(AppError::ServiceUnavailable("test".into()).is_server_error());
    }

    #[test]
    fn test_database_error_conversion() {
        use cmms_database::DatabaseError as DbErr;

        let app: AppError = DbErr::Unavailable("pool exhausted".into()).into();
        assert!(matches!(app, AppError::ServiceUnavailable(_)));

        let app: AppError = DbErr::Rejected("not a SELECT".into()).into();
        assert!(matches!(app, AppError::ValidationError(_)));

        let app: AppError = DbErr::Query("bad column".into()).into();
        assert!(matches!(app, AppError::DatabaseError(_)));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "RATE_LIMIT_EXCEEDED".to_string(),
            message: "too many requests".to_string(),
            code: "429".to_string(),
            category: "RATE_LIMIT".to_string(),
            details: None,
            timestamp: chrono::Utc::now(),
            request_id: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("RATE_LIMIT_EXCEEDED"));
        assert!(!json.contains("details"));
        assert!(!json.contains("request_id"));
    }
}
