//! Adapter configuration management.
//!
//! Handles loading, saving, and validating the adapter configuration including:
//! - Scan timeout, power mode and match aggressiveness
//! - Restart debounce between scan sessions
//! - Connect deadline and retry pacing
//! - Notification buffer size
//!
//! Per-call overrides for connecting live in [`ConnectParameters`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Default scan duration before a session elapses on its own.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5_000;

/// Default wait after cancelling a running scan before starting the next one.
pub const DEFAULT_SCAN_RESTART_GRACE_MS: u64 = 1_000;

/// Default overall connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Default pause between native connect attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 100;

/// Default bound on waiting for a native disconnect signal.
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 10;

/// Default capacity of the notification broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`AdapterConfig`].
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration values are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Scan power/latency tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Passive listening piggybacking on other scans.
    Opportunistic,
    /// Long interval, short window.
    #[default]
    LowPower,
    /// Medium interval and window.
    Balanced,
    /// Continuous scanning.
    LowLatency,
}

/// How aggressively advertisements are matched before being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMatchMode {
    /// Report on the first matching advertisement, even if weak.
    Aggressive,
    /// Require a stronger or repeated sighting before reporting.
    #[default]
    Sticky,
}

/// Link priority hint passed to the native connect primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPriority {
    /// Platform default interval.
    #[default]
    Balanced,
    /// Short interval for throughput.
    High,
    /// Long interval to save power.
    LowPower,
}

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// How long a scan session runs before it elapses.
    pub scan_timeout_ms: u64,

    /// Power/latency tradeoff of the native scan.
    pub scan_mode: ScanMode,

    /// Match aggressiveness of the native scan.
    pub scan_match_mode: ScanMatchMode,

    /// Ask the radio to report every advertisement, not only the first per device.
    pub allow_duplicates: bool,

    /// Wait after cancelling a running scan before a restart proceeds.
    pub scan_restart_grace_ms: u64,

    /// Overall connect deadline.
    pub connect_timeout_secs: u64,

    /// Pause between native connect attempts.
    pub connect_retry_delay_ms: u64,

    /// Bound on waiting for the native disconnect signal.
    pub disconnect_timeout_secs: u64,

    /// Notification broadcast buffer.
    pub event_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            scan_mode: ScanMode::default(),
            scan_match_mode: ScanMatchMode::default(),
            allow_duplicates: true,
            scan_restart_grace_ms: DEFAULT_SCAN_RESTART_GRACE_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            disconnect_timeout_secs: DEFAULT_DISCONNECT_TIMEOUT_SECS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AdapterConfig {
    /// Scan session duration.
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Restart debounce.
    #[must_use]
    pub const fn scan_restart_grace(&self) -> Duration {
        Duration::from_millis(self.scan_restart_grace_ms)
    }

    /// Overall connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pause between connect attempts.
    #[must_use]
    pub const fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Disconnect signal bound.
    #[must_use]
    pub const fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed or invalid.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match Self::load_from(path) {
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all violations.
    ///
    /// # Errors
    ///
    /// Returns the single violation, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let non_zero = [
            ("scan_timeout_ms", self.scan_timeout_ms),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("disconnect_timeout_secs", self.disconnect_timeout_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.event_capacity == 0 {
            errors.push(ConfigError::ValidationError {
                field: "event_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Per-call connect options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectParameters {
    /// Overrides the adapter's connect deadline for this call.
    pub timeout: Option<Duration>,

    /// Let the platform connect whenever the device next becomes available.
    pub auto_connect: bool,

    /// Force the LE transport on dual-mode devices.
    pub force_ble_transport: bool,

    /// Requested link priority.
    pub priority: ConnectionPriority,
}

impl ConnectParameters {
    /// Parameters with a caller-supplied deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Default location of the configuration file.
///
/// On Linux: `/etc/blecentral/config.toml`
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/blecentral/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "blecentral").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
