//! # blecentral-server
//!
//! HTTP server for the blecentral BLE central control plane.
//!
//! This binary provides:
//! - REST API for scanning, device listing, connect and disconnect
//! - OpenAPI document at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, with the simulated radio
//! cargo run --package blecentral-server
//!
//! # Against BlueZ
//! cargo run --package blecentral-server --features bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use blecentral_server::state::SharedState;
use blecentral_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Environment variable overriding the listen address.
const BIND_ENV: &str = "BLECENTRAL_BIND";

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting blecentral-server");

    let state = AppState::from_environment().await?;
    spawn_event_logger(&state);

    let app = api::create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var(BIND_ENV)
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, releasing the radio");
    state.adapter().stop_scan();
    if let Err(e) = state.adapter().disconnect_all().await {
        warn!(error = %e, "Failed to disconnect every device");
    }

    Ok(())
}

/// Mirror adapter events into the log.
fn spawn_event_logger(state: &SharedState) {
    let mut events = state.adapter().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "Adapter event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
