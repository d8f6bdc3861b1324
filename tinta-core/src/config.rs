//! YAML configuration for the daemon and its clients.
//!
//! # Lookup
//!
//! ```text
//! --config <path>          (explicit; must exist)
//! /etc/tinta/config.yaml   (default; optional, missing file means defaults)
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)`: explicit file; used by tests with `TempDir`
//! - `load(explicit)`: resolves the lookup order above, delegates to `load_at`
//!
//! Every field has a default, so a partial file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// System-wide configuration file consulted when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tinta/config.yaml";

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tinta4plus.sock";
pub const DEFAULT_PID_FILE: &str = "/tmp/tinta4plus.pid";
pub const DEFAULT_DEV_PORT: &str = "/dev/port";
pub const DEFAULT_SECURE_BOOT_EFIVAR: &str =
    "/sys/firmware/efi/efivars/SecureBoot-8be4df61-93ca-11d2-aa0d-00e098032b8c";

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Liveness marker holding the daemon pid.
    pub pid_file: PathBuf,
    /// Idle interval after which the watchdog shuts the daemon down.
    pub watchdog_timeout_ms: u64,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub ec: EcConfig,
    pub panel: PanelConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcConfig {
    /// Port I/O device; offsets into it are I/O port numbers.
    pub dev_port: PathBuf,
    /// EFI variable reporting the secure boot state.
    pub secure_boot_efivar: PathBuf,
    /// Serve register commands against the in-process EC simulator instead
    /// of real ports. Intended for development machines.
    pub simulate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PanelConfig {
    /// Helper executable driving the panel's timing controller. When unset,
    /// display-mode commands fail with "not configured".
    pub program: Option<PathBuf>,
    /// Arguments placed before the operation name.
    pub args: Vec<String>,
    /// Upper bound on one panel operation, in seconds (0 = default of 10).
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Socket read/write timeout applied after connecting.
    pub connect_timeout_ms: u64,
    /// Period of the keepalive sent by attached sessions.
    pub keepalive_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            watchdog_timeout_ms: 20_000,
            log_level: "info".to_string(),
            ec: EcConfig::default(),
            panel: PanelConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for EcConfig {
    fn default() -> Self {
        Self {
            dev_port: PathBuf::from(DEFAULT_DEV_PORT),
            secure_boot_efivar: PathBuf::from(DEFAULT_SECURE_BOOT_EFIVAR),
            simulate: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            keepalive_interval_ms: 2_400,
        }
    }
}

impl DaemonConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "watchdog_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.client.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "client.keepalive_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.client.keepalive_interval_ms >= self.watchdog_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "client.keepalive_interval_ms ({}) must be shorter than watchdog_timeout_ms ({})",
                self.client.keepalive_interval_ms, self.watchdog_timeout_ms
            )));
        }
        // Keepalives queue behind a running panel operation, so it has to
        // finish inside one watchdog period.
        if self.panel.program.is_some() && self.panel.timeout() >= self.watchdog_timeout() {
            return Err(ConfigError::Invalid(format!(
                "panel timeout ({}s) must be shorter than watchdog_timeout_ms ({})",
                self.panel.timeout().as_secs(),
                self.watchdog_timeout_ms
            )));
        }
        if self.socket_path.as_os_str().is_empty() || self.pid_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "socket_path and pid_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl PanelConfig {
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(10),
            secs => Duration::from_secs(secs),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the configuration at `path`.
///
/// A missing file yields the defaults; malformed YAML yields
/// `ConfigError::Parse` with the path attached.
pub fn load_at(path: &Path) -> Result<DaemonConfig, ConfigError> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DaemonConfig = if contents.trim().is_empty() {
        DaemonConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Resolve the configuration from an explicit path or the system default.
///
/// Unlike the default location, an explicit path must exist.
pub fn load(explicit: Option<&Path>) -> Result<DaemonConfig, ConfigError> {
    match explicit {
        Some(path) if !path.exists() => Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        }),
        Some(path) => load_at(path),
        None => load_at(Path::new(DEFAULT_CONFIG_PATH)),
    }
}
