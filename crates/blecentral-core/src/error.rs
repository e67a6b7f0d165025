//! Unified error types for the blecentral core library.
//!
//! This module provides a unified error type [`CentralError`] that covers all failure
//! modes of the adapter control plane. Configuration has its own specific error type
//! ([`ConfigError`](crate::config::ConfigError)) that converts into it.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Explicit no-ops**: The two no-op kinds (`ScanAlreadyActive`, `DisconnectNotConnected`)
//!   exist so they can be logged and classified, but the core never returns them
//! - **Context preservation**: Variants carry the device id and native message
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use blecentral_core::error::{CentralError, Result};
//! use blecentral_core::DeviceId;
//!
//! fn require_known(id: DeviceId, known: bool) -> Result<()> {
//!     if !known {
//!         return Err(CentralError::DeviceNotFound(id));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceId;

/// The unified error type for all blecentral operations.
#[derive(Debug, Error)]
pub enum CentralError {
    // =========================================================================
    // SCAN ERRORS
    // =========================================================================
    /// A scan was requested while another one was running.
    ///
    /// Informational: the controller restarts the scan instead of returning this.
    #[error("A scan session is already active; it will be restarted")]
    ScanAlreadyActive,

    /// The scan session was cancelled. Normal termination, never propagated.
    #[error("Scan session was cancelled")]
    ScanCancelled,

    /// The native start-scan primitive failed.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    // =========================================================================
    // CONNECTION ERRORS
    // =========================================================================
    /// The connect deadline elapsed without a connected signal.
    #[error("Connecting to {device} timed out after {}ms", .timeout.as_millis())]
    ConnectionTimeout {
        /// Device that was being connected.
        device: DeviceId,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The native port reported a definitive connect failure.
    #[error("Connection to {device} failed: {message}")]
    ConnectionError {
        /// Device that failed to connect.
        device: DeviceId,
        /// Native failure description.
        message: String,
    },

    /// Disconnect was requested for a device that is not connected. Treated as success.
    #[error("Device {0} is not connected")]
    DisconnectNotConnected(DeviceId),

    /// The native port reported a disconnect failure.
    #[error("Disconnecting {device} failed: {message}")]
    DisconnectFailed {
        /// Device that failed to disconnect.
        device: DeviceId,
        /// Native failure description.
        message: String,
    },

    /// No disconnected signal arrived within the configured bound.
    #[error("Disconnecting {device} timed out after {}ms", .timeout.as_millis())]
    DisconnectTimeout {
        /// Device that was being disconnected.
        device: DeviceId,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The native port could not resolve a device for the given id.
    #[error("Device not found: '{0}'. Ensure the device is powered on and within range.")]
    DeviceNotFound(DeviceId),

    /// The caller cancelled the operation.
    #[error("Operation was cancelled")]
    Cancelled,

    // =========================================================================
    // NATIVE RADIO ERRORS
    // =========================================================================
    /// No usable radio adapter.
    #[error(
        "No Bluetooth adapter available. Ensure Bluetooth hardware is present and powered on."
    )]
    AdapterUnavailable,

    /// A native primitive failed outside the scan and connect protocols.
    #[error("Native radio error: {0}")]
    NativeFailure(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for blecentral operations.
pub type Result<T> = std::result::Result<T, CentralError>;

impl CentralError {
    /// Returns `true` if this error is related to scanning.
    #[inline]
    #[must_use]
    pub const fn is_scan_error(&self) -> bool {
        matches!(
            self,
            Self::ScanAlreadyActive | Self::ScanCancelled | Self::ScanFailed(_)
        )
    }

    /// Returns `true` if this error is related to connecting or disconnecting.
    #[inline]
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionError { .. }
                | Self::DisconnectNotConnected(_)
                | Self::DisconnectFailed { .. }
                | Self::DisconnectTimeout { .. }
                | Self::DeviceNotFound(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if the operation ended because a cancellation scope fired,
    /// either the caller's token or a deadline.
    #[inline]
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::ScanCancelled
                | Self::ConnectionTimeout { .. }
                | Self::DisconnectTimeout { .. }
        )
    }

    /// Returns `true` if this error represents an expected operational state
    /// rather than a failure.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(
            self,
            Self::ScanAlreadyActive | Self::ScanCancelled | Self::DisconnectNotConnected(_)
        )
    }

    /// Returns `true` if retrying the operation may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError { .. }
                | Self::ConnectionTimeout { .. }
                | Self::DeviceNotFound(_)
                | Self::ScanFailed(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 200-equivalent outcomes that only surface in logs
            Self::ScanAlreadyActive | Self::ScanCancelled | Self::DisconnectNotConnected(_) => 200,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 409 Conflict - cancelled by the caller
            Self::Cancelled => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::IoError(_) => 500,

            // 502 Bad Gateway - the radio answered with a failure
            Self::ConnectionError { .. } | Self::DisconnectFailed { .. } => 502,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::AdapterUnavailable | Self::ScanFailed(_) | Self::NativeFailure(_) => 503,

            // 504 Gateway Timeout - the radio never answered
            Self::ConnectionTimeout { .. } | Self::DisconnectTimeout { .. } => 504,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ScanAlreadyActive => "SCAN_ALREADY_ACTIVE",
            Self::ScanCancelled => "SCAN_CANCELLED",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            Self::ConnectionError { .. } => "CONNECTION_ERROR",
            Self::DisconnectNotConnected(_) => "DISCONNECT_NOT_CONNECTED",
            Self::DisconnectFailed { .. } => "DISCONNECT_FAILED",
            Self::DisconnectTimeout { .. } => "DISCONNECT_TIMEOUT",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::AdapterUnavailable => "ADAPTER_UNAVAILABLE",
            Self::NativeFailure(_) => "NATIVE_FAILURE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for CentralError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } | ConfigError::WriteError { path, source } => {
                Self::IoError(std::io::Error::new(
                    source.kind(),
                    format!("{}: {source}", path.display()),
                ))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn id() -> DeviceId {
        DeviceId::from_u128(1)
    }

    #[test]
    fn test_scan_error_classification() {
        assert!(CentralError::ScanAlreadyActive.is_scan_error());
        assert!(CentralError::ScanCancelled.is_scan_error());
        assert!(CentralError::ScanFailed("busy".into()).is_scan_error());

        assert!(!CentralError::Cancelled.is_scan_error());
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(CentralError::ConnectionTimeout {
            device: id(),
            timeout: Duration::from_secs(20)
        }
        .is_connection_error());
        assert!(CentralError::ConnectionError {
            device: id(),
            message: "gatt 133".into()
        }
        .is_connection_error());
        assert!(CentralError::DeviceNotFound(id()).is_connection_error());

        assert!(!CentralError::AdapterUnavailable.is_connection_error());
    }

    #[test]
    fn test_no_op_kinds_are_expected_states() {
        assert!(CentralError::ScanAlreadyActive.is_expected_state());
        assert!(CentralError::ScanCancelled.is_expected_state());
        assert!(CentralError::DisconnectNotConnected(id()).is_expected_state());

        assert!(!CentralError::Cancelled.is_expected_state());
        assert!(!CentralError::DeviceNotFound(id()).is_expected_state());
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(CentralError::Cancelled.is_cancellation());
        assert!(CentralError::ConnectionTimeout {
            device: id(),
            timeout: Duration::from_secs(1)
        }
        .is_cancellation());

        assert!(!CentralError::ConnectionError {
            device: id(),
            message: "x".into()
        }
        .is_cancellation());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(CentralError::DeviceNotFound(id()).http_status_code(), 404);
        assert_eq!(CentralError::Cancelled.http_status_code(), 409);
        assert_eq!(
            CentralError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            CentralError::ConnectionError {
                device: id(),
                message: "x".into()
            }
            .http_status_code(),
            502
        );
        assert_eq!(CentralError::AdapterUnavailable.http_status_code(), 503);
        assert_eq!(
            CentralError::ConnectionTimeout {
                device: id(),
                timeout: Duration::from_secs(20)
            }
            .http_status_code(),
            504
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CentralError::AdapterUnavailable.error_code(),
            "ADAPTER_UNAVAILABLE"
        );
        assert_eq!(
            CentralError::DeviceNotFound(id()).error_code(),
            "DEVICE_NOT_FOUND"
        );
        assert_eq!(
            CentralError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: CentralError = io_err.into();
        assert!(matches!(err, CentralError::IoError(_)));
    }

    #[test]
    fn test_error_display_messages() {
        let err = CentralError::ConnectionTimeout {
            device: id(),
            timeout: Duration::from_secs(20),
        };
        assert!(err.to_string().contains("20000ms"));

        let err = CentralError::ConnectionError {
            device: id(),
            message: "GATT_ERROR".into(),
        };
        assert!(err.to_string().contains("GATT_ERROR"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CentralError>();
        assert_sync::<CentralError>();
    }
}
