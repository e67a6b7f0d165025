//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `devices` - Discovered/connected device listing, connect and disconnect
//! - `health` - Service health checks
//! - `scan` - Scan session control
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod scan;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                        - Health check
/// /api
/// ├── /scan                      - GET status, POST start, DELETE stop
/// ├── /devices                   - Discovered devices
/// │   ├── /connected             - Connected devices
/// │   ├── /{id}/connect          - Connect by id
/// │   └── /{id}/disconnect       - Disconnect by id
/// └── /openapi.json              - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/scan", scan::router())
                .nest("/devices", devices::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .with_state(state)
}
