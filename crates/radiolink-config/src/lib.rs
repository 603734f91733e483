#![deny(unsafe_code)]

//! Configuration loading and validation for radiolink.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure.
//! Every section is optional; a missing key falls back to its default.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How the radio daemon is launched and supervised.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Link identities substituted into the daemon config template.
    #[serde(default)]
    pub link: LinkConfig,

    /// Fixed device selection (skips interface discovery when set).
    #[serde(default)]
    pub device: DeviceConfig,

    /// IPC transport timeouts.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Report payload layout.
    #[serde(default)]
    pub report: ReportConfig,

    /// Periodic telemetry polling.
    #[serde(default)]
    pub poller: PollerConfig,

    /// HTTP bridge for the browser UI.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for launching the external daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the daemon executable.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Name matched against the process list to find prior instances.
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Command prefix used to launch (and interrupt) the daemon, e.g. `["sudo"]`.
    #[serde(default = "default_launcher")]
    pub launcher: Vec<String>,

    /// Optional debugging wrapper placed before the executable (e.g. "valgrind").
    #[serde(default)]
    pub debug_wrapper: Option<String>,

    /// Extra arguments passed before the config/socket flags.
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,

    /// Path to the config template rendered for every instance.
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Directory holding the per-instance socket and rendered config.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Seconds to wait for the daemon to exit after EXIT (0 = wait forever).
    #[serde(default)]
    pub stop_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            process_name: default_process_name(),
            launcher: default_launcher(),
            debug_wrapper: None,
            extra_args: default_extra_args(),
            template: default_template(),
            runtime_dir: default_runtime_dir(),
            stop_timeout_secs: 0,
        }
    }
}

impl DaemonConfig {
    /// Stop timeout as a [`Duration`], `None` meaning "wait forever".
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }
}

fn default_executable() -> String {
    "./radiosocketd".to_string()
}

fn default_process_name() -> String {
    "radiosocketd".to_string()
}

fn default_launcher() -> Vec<String> {
    vec!["sudo".to_string()]
}

fn default_extra_args() -> Vec<String> {
    vec!["-v".to_string()]
}

fn default_template() -> PathBuf {
    PathBuf::from("radiosocketd.conf.template")
}

fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Link identity pair. Values are substituted verbatim, so hex strings
/// such as `0xDD00` are kept as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_own_id")]
    pub own_id: String,

    #[serde(default = "default_other_id")]
    pub other_id: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            own_id: default_own_id(),
            other_id: default_other_id(),
        }
    }
}

fn default_own_id() -> String {
    "0xFF00".to_string()
}

fn default_other_id() -> String {
    "0xDD00".to_string()
}

/// Fixed physical device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Physical device index (`phy#N`).
    #[serde(default)]
    pub phys: Option<u32>,

    /// Monitor interface name; defaults to `wlan<phys>mon`.
    #[serde(default)]
    pub ifname: Option<String>,
}

/// IPC transport timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Read timeout per call in milliseconds (0 disables).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Connect timeout in milliseconds (0 disables).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl IpcConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

/// Report payload layout selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// "v2" (11-wide blocks, tags P/C/A/U) or "v1" (10-wide blocks, tags P/C).
    #[serde(default = "default_report_protocol")]
    pub protocol: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            protocol: default_report_protocol(),
        }
    }
}

fn default_report_protocol() -> String {
    "v2".to_string()
}

/// Periodic telemetry polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Report requests per second.
    #[serde(default = "default_poll_frequency")]
    pub frequency_hz: f64,

    /// Samples kept per telemetry record.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_poll_frequency(),
            history_len: default_history_len(),
        }
    }
}

/// Accepted range of `poller.frequency_hz`.
pub const POLL_FREQUENCY_RANGE_HZ: std::ops::RangeInclusive<f64> = 0.001..=1000.0;

impl PollerConfig {
    /// Interval between two report requests. Frequencies outside
    /// [`POLL_FREQUENCY_RANGE_HZ`] are clamped to it, and a non-finite one
    /// falls back to the default.
    pub fn interval(&self) -> Duration {
        let hz = if self.frequency_hz.is_finite() {
            self.frequency_hz
                .clamp(*POLL_FREQUENCY_RANGE_HZ.start(), *POLL_FREQUENCY_RANGE_HZ.end())
        } else {
            default_poll_frequency()
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

fn default_poll_frequency() -> f64 {
    2.0
}

fn default_history_len() -> usize {
    50
}

/// HTTP bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bridge_addr")]
    pub listen_addr: String,

    #[serde(default = "default_bridge_port")]
    pub listen_port: u16,

    /// Directory of the built browser UI.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_bridge_addr(),
            listen_port: default_bridge_port(),
            static_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Address the bridge listens on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.listen_addr.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "bridge.listen_addr must be an IP address, got {:?}",
                self.listen_addr
            ))
        })?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }
}

fn default_bridge_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_bridge_port() -> u16 {
    8080
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Report protocols understood by the decoder.
pub const REPORT_PROTOCOLS: [&str; 2] = ["v1", "v2"];

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "Loading config");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.executable.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.executable must not be empty".to_string(),
            ));
        }
        if self.daemon.process_name.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.process_name must not be empty".to_string(),
            ));
        }
        if self.link.own_id.is_empty() || self.link.other_id.is_empty() {
            return Err(ConfigError::Validation(
                "link.own_id and link.other_id must not be empty".to_string(),
            ));
        }
        if self.device.ifname.is_some() && self.device.phys.is_none() {
            return Err(ConfigError::Validation(
                "device.ifname requires device.phys".to_string(),
            ));
        }
        if !REPORT_PROTOCOLS.contains(&self.report.protocol.as_str()) {
            return Err(ConfigError::Validation(format!(
                "report.protocol must be one of {:?}, got {:?}",
                REPORT_PROTOCOLS, self.report.protocol
            )));
        }
        if !POLL_FREQUENCY_RANGE_HZ.contains(&self.poller.frequency_hz) {
            return Err(ConfigError::Validation(format!(
                "poller.frequency_hz must be within {:?}, got {}",
                POLL_FREQUENCY_RANGE_HZ, self.poller.frequency_hz
            )));
        }
        if self.poller.history_len == 0 {
            return Err(ConfigError::Validation(
                "poller.history_len must be at least 1".to_string(),
            ));
        }
        self.bridge.socket_addr()?;
        if self.bridge.enabled && self.bridge.listen_port == 0 {
            return Err(ConfigError::Validation(
                "bridge.listen_port must be non-zero when the bridge is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
