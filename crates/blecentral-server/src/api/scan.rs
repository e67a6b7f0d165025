//! Scan control API endpoints.
//!
//! A scan runs in a background task; `POST` returns as soon as it is
//! scheduled. Starting a scan while one runs restarts it.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use blecentral_core::{ScanFilterOptions, ScanOutcome, ScanState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current scan status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "scanning": true,
    "state": "scanning",
    "discovered_count": 3
}))]
pub struct ScanStatusResponse {
    /// Whether a scan session is running.
    pub scanning: bool,

    /// Scan state.
    pub state: ScanState,

    /// Devices discovered in the current session.
    #[schema(example = 3)]
    pub discovered_count: usize,
}

/// Scan start request. Every field is optional; send `{}` for defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "timeout_ms": 10000,
    "service_uuids": ["0000180d-0000-1000-8000-00805f9b34fb"],
    "device_names": null,
    "device_addresses": null
}))]
pub struct StartScanRequest {
    /// Session length; defaults to the configured scan timeout.
    #[schema(example = 10000)]
    pub timeout_ms: Option<u64>,

    /// Only report devices advertising one of these services.
    pub service_uuids: Option<Vec<Uuid>>,

    /// Only report devices advertising one of these names.
    pub device_names: Option<Vec<String>>,

    /// Only report devices with one of these addresses.
    pub device_addresses: Option<Vec<String>>,
}

impl StartScanRequest {
    fn filter_options(&self) -> ScanFilterOptions {
        ScanFilterOptions {
            service_uuids: self.service_uuids.clone().unwrap_or_default(),
            device_names: self.device_names.clone().unwrap_or_default(),
            device_addresses: self.device_addresses.clone().unwrap_or_default(),
            ..ScanFilterOptions::default()
        }
    }
}

/// Scan start response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "timeout_ms": 5000,
    "started_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct StartScanResponse {
    /// Session length in milliseconds.
    #[schema(example = 5000)]
    pub timeout_ms: u64,

    /// When the scan was scheduled.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub started_at_utc: String,
}

/// Scan stop response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "stopped": true }))]
pub struct StopScanResponse {
    /// `false` if no scan was running.
    pub stopped: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Creates the scan router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_scan).post(start_scan).delete(stop_scan))
}

/// Get the scan status.
#[utoipa::path(
    get,
    path = "/api/scan",
    tag = "scan",
    operation_id = "getScan",
    summary = "Get scan status",
    responses(
        (status = 200, description = "Current scan status", body = ScanStatusResponse)
    )
)]
pub async fn get_scan(State(state): State<SharedState>) -> Json<ScanStatusResponse> {
    let adapter = state.adapter();
    let scan_state = adapter.scan_state();

    Json(ScanStatusResponse {
        scanning: scan_state == ScanState::Scanning,
        state: scan_state,
        discovered_count: adapter.discovered_devices().len(),
    })
}

/// Start (or restart) a scan session.
#[utoipa::path(
    post,
    path = "/api/scan",
    tag = "scan",
    operation_id = "startScan",
    summary = "Start a scan",
    description = "Schedules a scan session in the background. The discovered \
        device list is cleared when the session begins. A running session is \
        cancelled and replaced after a short grace period.",
    request_body = StartScanRequest,
    responses(
        (status = 202, description = "Scan scheduled", body = StartScanResponse),
        (status = 400, description = "Invalid timeout", body = super::error::ErrorResponse)
    )
)]
pub async fn start_scan(
    State(state): State<SharedState>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<(StatusCode, Json<StartScanResponse>)> {
    let adapter = state.adapter().clone();
    let timeout = match request.timeout_ms {
        Some(0) => {
            return Err(ApiError::bad_request(
                "invalid_timeout",
                "timeout_ms must be greater than zero",
            ))
        }
        Some(ms) => Duration::from_millis(ms),
        None => adapter.config().scan_timeout(),
    };
    let options = request.filter_options();
    options.validate()?;

    tokio::spawn(async move {
        match adapter
            .start_scan_for(options, None, timeout, CancellationToken::new())
            .await
        {
            Ok(ScanOutcome::Elapsed) => info!(
                discovered = adapter.discovered_devices().len(),
                "Background scan finished"
            ),
            Ok(ScanOutcome::Cancelled) => info!("Background scan cancelled"),
            Err(e) => warn!(error = %e, "Background scan failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            started_at_utc: Utc::now().to_rfc3339(),
        }),
    ))
}

/// Stop the running scan session.
#[utoipa::path(
    delete,
    path = "/api/scan",
    tag = "scan",
    operation_id = "stopScan",
    summary = "Stop scanning",
    responses(
        (status = 200, description = "Scan stopped, or none was running", body = StopScanResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> Json<StopScanResponse> {
    Json(StopScanResponse {
        stopped: state.adapter().stop_scan(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_has_no_filters() {
        let request: StartScanRequest = serde_json::from_str("{}").unwrap();
        assert!(request.timeout_ms.is_none());
        assert!(request.filter_options().is_empty());
    }

    #[test]
    fn test_request_maps_to_filter_options() {
        let request: StartScanRequest =
            serde_json::from_str(r#"{"device_names":["Thermo"],"timeout_ms":100}"#).unwrap();
        let options = request.filter_options();
        assert_eq!(options.device_names, vec!["Thermo".to_string()]);
        assert!(options.service_uuids.is_empty());
    }
}
