//! Device API endpoints.
//!
//! Lists discovered and connected devices and drives connect/disconnect.

use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use blecentral_core::{ConnectParameters, DeviceFilter, DeviceId, DeviceInfo};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A list of devices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceListResponse {
    /// The devices.
    pub devices: Vec<DeviceInfo>,

    /// Number of devices.
    #[schema(example = 2)]
    pub count: usize,
}

impl DeviceListResponse {
    fn from_infos(devices: Vec<DeviceInfo>) -> Self {
        Self {
            count: devices.len(),
            devices,
        }
    }
}

/// Connect request. Send `{}` to use the configured deadline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({ "timeout_secs": 10 }))]
pub struct ConnectRequest {
    /// Connect deadline in seconds.
    #[schema(example = 10)]
    pub timeout_secs: Option<u64>,
}

/// Connect response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectResponse {
    /// The connected device.
    pub device: DeviceInfo,

    /// When the connection was established.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub connected_at_utc: String,
}

/// Disconnect response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "00000000-0000-0000-0000-aabbccddeeff",
    "was_connected": true
}))]
pub struct DisconnectResponse {
    /// Device id.
    pub id: String,

    /// `false` if the device was not connected, in which case nothing happened.
    pub was_connected: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Creates the devices router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_discovered))
        .route("/connected", get(list_connected))
        .route("/{id}/connect", post(connect_device))
        .route("/{id}/disconnect", post(disconnect_device))
}

fn parse_id(id: &str) -> ApiResult<DeviceId> {
    DeviceId::from_str(id).map_err(|e| {
        ApiError::bad_request("invalid_device_id", format!("Invalid device id '{id}': {e}"))
    })
}

/// List devices discovered in the current scan session.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDiscoveredDevices",
    summary = "List discovered devices",
    responses(
        (status = 200, description = "Discovered devices", body = DeviceListResponse)
    )
)]
pub async fn list_discovered(State(state): State<SharedState>) -> Json<DeviceListResponse> {
    let devices = state
        .adapter()
        .discovered_devices()
        .iter()
        .map(blecentral_core::Device::info)
        .collect();
    Json(DeviceListResponse::from_infos(devices))
}

/// List connected devices.
#[utoipa::path(
    get,
    path = "/api/devices/connected",
    tag = "devices",
    operation_id = "listConnectedDevices",
    summary = "List connected devices",
    responses(
        (status = 200, description = "Connected devices", body = DeviceListResponse)
    )
)]
pub async fn list_connected(State(state): State<SharedState>) -> Json<DeviceListResponse> {
    let devices = state
        .adapter()
        .connected_devices()
        .iter()
        .map(blecentral_core::Device::info)
        .collect();
    Json(DeviceListResponse::from_infos(devices))
}

/// Connect to a device.
#[utoipa::path(
    post,
    path = "/api/devices/{id}/connect",
    tag = "devices",
    operation_id = "connectDevice",
    summary = "Connect to a device",
    description = "Connects to a discovered device, or asks the radio to resolve \
        the id if it was not discovered. Failed attempts are retried until the \
        deadline. Returns immediately if the device is already connected.",
    params(
        ("id" = String, Path, description = "Device id (UUID)")
    ),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connected", body = ConnectResponse),
        (status = 400, description = "Invalid id or timeout", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown device", body = super::error::ErrorResponse),
        (status = 504, description = "Connect deadline elapsed", body = super::error::ErrorResponse)
    )
)]
pub async fn connect_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectResponse>> {
    let id = parse_id(&id)?;
    let params = match request.timeout_secs {
        Some(0) => {
            return Err(ApiError::bad_request(
                "invalid_timeout",
                "timeout_secs must be greater than zero",
            ))
        }
        Some(secs) => ConnectParameters::with_timeout(Duration::from_secs(secs)),
        None => ConnectParameters::default(),
    };

    let device = state
        .adapter()
        .connect_by_id(id, &params, &DeviceFilter::accept_all(), CancellationToken::new())
        .await?;
    info!(device = %device, "Connected via API");

    Ok(Json(ConnectResponse {
        device: device.info(),
        connected_at_utc: Utc::now().to_rfc3339(),
    }))
}

/// Disconnect a device.
#[utoipa::path(
    post,
    path = "/api/devices/{id}/disconnect",
    tag = "devices",
    operation_id = "disconnectDevice",
    summary = "Disconnect a device",
    params(
        ("id" = String, Path, description = "Device id (UUID)")
    ),
    responses(
        (status = 200, description = "Disconnected, or was not connected", body = DisconnectResponse),
        (status = 400, description = "Invalid id", body = super::error::ErrorResponse),
        (status = 502, description = "Radio refused the disconnect", body = super::error::ErrorResponse),
        (status = 504, description = "Disconnect not confirmed in time", body = super::error::ErrorResponse)
    )
)]
pub async fn disconnect_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DisconnectResponse>> {
    let id = parse_id(&id)?;
    let adapter = state.adapter();

    let was_connected = match adapter.connected_device(id) {
        Some(device) => {
            adapter.disconnect(&device).await?;
            true
        }
        None => false,
    };

    Ok(Json(DisconnectResponse {
        id: id.to_string(),
        was_connected,
    }))
}
