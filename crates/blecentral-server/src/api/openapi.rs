//! OpenAPI specification generation for the blecentral API.
//!
//! The document is served at `/api/openapi.json` and written to disk by the
//! `gen-openapi` binary.

use axum::Json;
use blecentral_core::{ConnectionState, DeviceInfo, ScanState};
use utoipa::OpenApi;

use super::devices::{ConnectRequest, ConnectResponse, DeviceListResponse, DisconnectResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::scan::{ScanStatusResponse, StartScanRequest, StartScanResponse, StopScanResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for blecentral.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blecentral API",
        version = "0.1.0",
        description = r#"
# blecentral API

Control plane for a Bluetooth Low Energy central adapter.

## Overview

1. **Scanning**: Start a time-boxed scan session with optional advertisement filters.
   Starting a new session replaces the running one and clears the discovered list.
2. **Devices**: List discovered and connected devices.
3. **Connections**: Connect by device id with retries until a deadline, and disconnect.

## Errors

Every error response has the shape `{ "error", "message", "details" }`. A connect
that does not complete before its deadline returns `504` with `connection_timeout`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local blecentral server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "scan", description = "Scan session control"),
        (name = "devices", description = "Discovered and connected devices")
    ),
    paths(
        super::health::health_check,
        super::scan::get_scan,
        super::scan::start_scan,
        super::scan::stop_scan,
        super::devices::list_discovered,
        super::devices::list_connected,
        super::devices::connect_device,
        super::devices::disconnect_device,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            ScanState,
            ScanStatusResponse,
            StartScanRequest,
            StartScanResponse,
            StopScanResponse,
            ConnectionState,
            DeviceInfo,
            DeviceListResponse,
            ConnectRequest,
            ConnectResponse,
            DisconnectResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "blecentral API");
        assert!(spec.paths.paths.contains_key("/api/devices/{id}/connect"));
        assert!(spec.paths.paths.contains_key("/api/scan"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"blecentral API\""));
    }
}
