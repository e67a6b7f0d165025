//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blecentral_core::{default_config_path, Adapter, AdapterConfig};
use tracing::info;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "BLECENTRAL_CONFIG";

/// Handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
///
/// The adapter synchronizes itself, so no outer lock is needed.
pub struct AppState {
    adapter: Adapter,
    started_at: Instant,
}

impl AppState {
    /// Wrap an already built adapter.
    #[must_use]
    pub fn new(adapter: Adapter) -> SharedState {
        Arc::new(Self {
            adapter,
            started_at: Instant::now(),
        })
    }

    /// Load configuration and open the radio selected at build time.
    ///
    /// With the `bluetooth` feature the system BlueZ adapter is used,
    /// otherwise an in-process simulated radio.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the radio cannot be opened.
    pub async fn from_environment() -> anyhow::Result<SharedState> {
        let path = config_path();
        let config = AdapterConfig::load_or_default(&path)?;
        info!(path = %path.display(), "Configuration loaded");

        #[cfg(feature = "bluetooth")]
        let adapter = Adapter::new(config, blecentral_core::BluezRadio::new().await?);
        #[cfg(not(feature = "bluetooth"))]
        let adapter = {
            info!("Built without the bluetooth feature, using the simulated radio");
            Adapter::new(config, blecentral_core::SimulatedRadio::new())
        };

        Ok(Self::new(adapter))
    }

    /// The BLE adapter.
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV).map_or_else(default_config_path, PathBuf::from)
}
