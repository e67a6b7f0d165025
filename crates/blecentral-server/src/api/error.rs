//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blecentral_core::CentralError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - The radio does not know the device.
    #[error("Not Found: {message}")]
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - The operation was cancelled before it finished.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 422 Unprocessable Entity - Well-formed input that fails validation.
    #[error("Unprocessable Entity: {message}")]
    UnprocessableEntity {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 502 Bad Gateway - The radio reported a failure.
    #[error("Bad Gateway: {message}")]
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Device the failure is about.
        device_id: String,
    },

    /// 503 Service Unavailable - No usable Bluetooth radio.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 504 Gateway Timeout - The radio did not answer in time.
    #[error("Gateway Timeout: {message}")]
    GatewayTimeout {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },
}

impl ApiError {
    /// A 400 for a path or body value that could not be parsed.
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "connection_timeout",
    "message": "Connecting to 00000000-0000-0000-0000-aabbccddeeff timed out after 20000ms",
    "details": { "timeout_ms": 20000 }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "device_not_found").
    #[schema(example = "device_not_found")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Device not found")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict { error_code, message } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::UnprocessableEntity { error_code, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::BadGateway {
                error_code,
                message,
                device_id,
            } => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "device_id": device_id })),
                },
            ),

            Self::ServiceUnavailable { error_code, message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::GatewayTimeout {
                error_code,
                message,
                timeout_ms,
            } => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "timeout_ms": timeout_ms })),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

fn millis(timeout: std::time::Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Convert from blecentral_core errors.
impl From<CentralError> for ApiError {
    fn from(err: CentralError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();

        match &err {
            CentralError::DeviceNotFound(_) | CentralError::ConfigNotFound(_) => {
                Self::NotFound { error_code, message }
            }
            CentralError::Cancelled => Self::Conflict { error_code, message },
            CentralError::ConfigParseError(_) | CentralError::ConfigValidationError(_) => {
                Self::UnprocessableEntity { error_code, message }
            }
            CentralError::ConnectionError { device, .. }
            | CentralError::DisconnectFailed { device, .. } => Self::BadGateway {
                error_code,
                message,
                device_id: device.to_string(),
            },
            CentralError::AdapterUnavailable
            | CentralError::ScanFailed(_)
            | CentralError::NativeFailure(_) => Self::ServiceUnavailable { error_code, message },
            CentralError::ConnectionTimeout { timeout, .. }
            | CentralError::DisconnectTimeout { timeout, .. } => Self::GatewayTimeout {
                error_code,
                message,
                timeout_ms: millis(*timeout),
            },
            // The adapter never returns the first three: they name no-op paths
            // that `http_status_code` reports as 200 and that only reach logs.
            CentralError::ScanAlreadyActive
            | CentralError::ScanCancelled
            | CentralError::DisconnectNotConnected(_)
            | CentralError::IoError(_) => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<blecentral_core::ConfigError> for ApiError {
    fn from(err: blecentral_core::ConfigError) -> Self {
        Self::from(CentralError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blecentral_core::DeviceId;
    use std::time::Duration;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("invalid_device_id", "not a uuid");
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_status_codes_follow_core_classification() {
        let device = DeviceId::from_u128(7);
        let cases = [
            CentralError::DeviceNotFound(device),
            CentralError::Cancelled,
            CentralError::ConfigValidationError("x".into()),
            CentralError::ConnectionError {
                device,
                message: "GATT 133".into(),
            },
            CentralError::AdapterUnavailable,
            CentralError::ConnectionTimeout {
                device,
                timeout: Duration::from_secs(20),
            },
        ];

        for err in cases {
            let expected = err.http_status_code();
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status().as_u16(), expected);
        }
    }

    #[test]
    fn test_no_op_kinds_render_as_internal_errors() {
        let cases = [
            CentralError::ScanAlreadyActive,
            CentralError::ScanCancelled,
            CentralError::DisconnectNotConnected(DeviceId::from_u128(2)),
        ];

        for err in cases {
            assert_eq!(err.http_status_code(), 200);
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_error_codes_are_lowercase() {
        let err = ApiError::from(CentralError::DeviceNotFound(DeviceId::from_u128(1)));
        assert!(matches!(err, ApiError::NotFound { ref error_code, .. } if error_code == "device_not_found"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }
}
