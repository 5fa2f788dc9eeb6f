//! TOML-based configuration for the bridge binary.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\penbridge\config.toml`
//! - Linux:    `~/.config/penbridge/config.toml`
//! - macOS:    `~/Library/Application Support/penbridge/config.toml`
//!
//! Every field has a default, so a missing file, a missing section, or a
//! missing key all fall back to working values.  Example:
//!
//! ```toml
//! [server]
//! implementation_id = "com.example.tablet-driver"
//! default_behavior = "always-set"
//!
//! [legacy]
//! enabled = false
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::discovery::{DefaultBehavior, Discovery, DiscoveryError};
use crate::infrastructure::network::pipe::default_pipe_path;
use crate::infrastructure::network::v1_server::V1ServerConfig;
use crate::infrastructure::network::v2_server::V2ServerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// No socket path is configured and the platform data directory could
    /// not be determined.
    #[error("could not determine platform data directory for the socket")]
    NoPlatformDataDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to resolve discovery directory: {0}")]
    Discovery(#[from] DiscoveryError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub legacy: LegacySection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Identity and transport of the current-protocol server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Reverse-DNS identifier, also the discovery descriptor's file name.
    #[serde(default = "default_implementation_id")]
    pub implementation_id: String,
    #[serde(default = "default_human_name")]
    pub human_name: String,
    #[serde(default = "default_semantic_version")]
    pub semantic_version: String,
    #[serde(default = "default_debug_version")]
    pub debug_version: String,
    #[serde(default = "default_homepage_url")]
    pub homepage_url: String,
    /// Socket path; the platform data directory is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub default_behavior: DefaultBehavior,
    #[serde(default = "default_interval_ms")]
    pub ping_interval_ms: u64,
}

/// The legacy-protocol server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pipe path; the well-known legacy path is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe_path: Option<PathBuf>,
    #[serde(default = "default_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub busy_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Overrides the platform discovery root (the directory holding
    /// `default.txt` and `available/`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_implementation_id() -> String {
    "io.github.penbridge".to_string()
}
fn default_human_name() -> String {
    "Penbridge".to_string()
}
fn default_semantic_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_debug_version() -> String {
    concat!("v", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_homepage_url() -> String {
    "https://github.com/penbridge/penbridge".to_string()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_liveness_poll_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            implementation_id: default_implementation_id(),
            human_name: default_human_name(),
            semantic_version: default_semantic_version(),
            debug_version: default_debug_version(),
            homepage_url: default_homepage_url(),
            socket_path: None,
            default_behavior: DefaultBehavior::default(),
            ping_interval_ms: default_interval_ms(),
        }
    }
}

impl Default for LegacySection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            pipe_path: None,
            ping_interval_ms: default_interval_ms(),
            liveness_poll_interval_ms: default_liveness_poll_ms(),
            busy_retry_delay_ms: default_interval_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Server configuration builders ─────────────────────────────────────────────

impl AppConfig {
    /// Resolves the current-protocol server settings, filling platform
    /// defaults for paths left unset.
    ///
    /// # Errors
    ///
    /// Fails when a path is unset and its platform directory cannot be
    /// determined.
    pub fn v2_server_config(&self) -> Result<V2ServerConfig, ConfigError> {
        let server = &self.server;
        let socket_path = match &server.socket_path {
            Some(path) => path.clone(),
            None => default_socket_path()?,
        };
        let discovery = match &self.discovery.root {
            Some(root) => Discovery::new(root),
            None => Discovery::platform_default()?,
        };
        Ok(V2ServerConfig {
            implementation_id: server.implementation_id.clone(),
            human_name: server.human_name.clone(),
            semantic_version: server.semantic_version.clone(),
            debug_version: server.debug_version.clone(),
            homepage_url: server.homepage_url.clone(),
            socket_path,
            discovery,
            default_behavior: server.default_behavior,
            ping_interval: interval(server.ping_interval_ms),
        })
    }

    /// Resolves the legacy-protocol server settings.
    pub fn v1_server_config(&self) -> V1ServerConfig {
        let legacy = &self.legacy;
        V1ServerConfig {
            pipe_path: legacy.pipe_path.clone().unwrap_or_else(default_pipe_path),
            ping_interval: interval(legacy.ping_interval_ms),
            liveness_poll_interval: interval(legacy.liveness_poll_interval_ms),
            busy_retry_delay: interval(legacy.busy_retry_delay_ms),
        }
    }
}

/// Loop intervals are at least 1 ms; zero would make the loops spin.
fn interval(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Default location of the current-protocol socket, inside the per-user
/// data directory.
pub fn default_socket_path() -> Result<PathBuf, ConfigError> {
    platform_data_dir()
        .map(|dir| dir.join("socket"))
        .ok_or(ConfigError::NoPlatformDataDir)
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if it does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if it does not exist.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("penbridge"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("penbridge"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("penbridge")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

fn platform_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map(|p| PathBuf::from(p).join("penbridge"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })?;
        Some(base.join("penbridge"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("penbridge")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
