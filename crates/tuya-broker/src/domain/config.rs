//! Broker configuration schema and the runtime settings derived from it.
//!
//! The on-disk format is TOML.  Every field is optional and falls back to a
//! default, so an empty file (or no file at all) yields a working broker:
//!
//! ```toml
//! log_level = "info"
//!
//! [credentials]
//! path = "tuya-devices.json"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 1024
//! # unix_socket = "/run/tuya-broker.sock"
//! # socket_mode = "660"
//! expose_local_keys = false
//!
//! [scan]
//! interval_secs = 60
//! window_secs = 10
//! stale_after_secs = 180
//! grace_secs = 0
//! ports = [6666, 6667, 7000]
//! probe = true
//! ```
//!
//! Unknown keys are rejected so a typo does not silently fall back to a
//! default.
//!
//! # Serde default values (for beginners)
//!
//! `#[serde(default = "some_fn")]` calls `some_fn()` when the key is missing.
//! `#[serde(default)]` on a struct uses its `Default` impl for the whole
//! section when the section header is missing.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discovery ports: 6666 plaintext, 6667 ECB, 7000 GCM.
pub const DEFAULT_SCAN_PORTS: [u16; 3] = [6666, 6667, 7000];

/// Slack the scheduler adds on top of the listen window before it gives up.
pub const SCAN_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// A configuration value that parses but does not make sense.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid setting '{field}': {reason}")]
pub struct SettingsError {
    pub field: &'static str,
    pub reason: String,
}

impl SettingsError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub scan: ScanSection,
}

/// Where the credential table lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    #[serde(default = "default_devices_file")]
    pub path: PathBuf,
}

/// Listener and response settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Ignored when `unix_socket` is set.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve on a UNIX domain socket at this path instead of TCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket: Option<PathBuf>,
    /// Octal permission bits applied to the socket file after every bind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_mode: Option<String>,
    /// Include each device's local key in API responses.
    #[serde(default)]
    pub expose_local_keys: bool,
}

/// Scan cycle timing and staleness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How long each scan listens for broadcasts.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Presence older than this is reported `fresh: false`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// 0 drops devices missing from the latest scan; otherwise they are kept
    /// for this long, tagged stale.
    #[serde(default)]
    pub grace_secs: u64,
    #[serde(default = "default_scan_ports")]
    pub ports: Vec<u16>,
    /// Broadcast the protocol 3.5 discovery request at the start of a scan.
    #[serde(default = "default_true")]
    pub probe: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_devices_file() -> PathBuf {
    PathBuf::from("tuya-devices.json")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1024
}
fn default_interval_secs() -> u64 {
    60
}
fn default_window_secs() -> u64 {
    10
}
fn default_stale_after_secs() -> u64 {
    180
}
fn default_scan_ports() -> Vec<u16> {
    DEFAULT_SCAN_PORTS.to_vec()
}
fn default_true() -> bool {
    true
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            credentials: CredentialsSection::default(),
            server: ServerSection::default(),
            scan: ScanSection::default(),
        }
    }
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            path: default_devices_file(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unix_socket: None,
            socket_mode: None,
            expose_local_keys: false,
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            stale_after_secs: default_stale_after_secs(),
            grace_secs: 0,
            ports: default_scan_ports(),
            probe: true,
        }
    }
}

// ── Runtime settings ──────────────────────────────────────────────────────────

/// Where the HTTP API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenConfig {
    Tcp(SocketAddr),
    /// The socket file is recreated on every start; `mode` is re-applied
    /// each time.
    Unix { path: PathBuf, mode: Option<u32> },
}

/// What happens to a device that the latest successful scan did not see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Remove it from the presence table immediately.
    DropMissing,
    /// Keep the last known address for this long, tagged stale.
    RetainFor(Duration),
}

/// Validated scan timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub interval: Duration,
    pub window: Duration,
    /// Hard bound the scheduler enforces on one scan.
    pub timeout: Duration,
    pub stale_after: Duration,
    pub staleness: StalenessPolicy,
    pub ports: Vec<u16>,
    pub probe: bool,
}

impl BrokerConfig {
    /// Resolves the listener from the `[server]` section.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if `host` is not an IP address or
    /// `socket_mode` is not an octal permission value.
    pub fn listen(&self) -> Result<ListenConfig, SettingsError> {
        if let Some(path) = &self.server.unix_socket {
            let mode = self
                .server
                .socket_mode
                .as_deref()
                .map(parse_socket_mode)
                .transpose()?;
            return Ok(ListenConfig::Unix {
                path: path.clone(),
                mode,
            });
        }

        let ip: IpAddr = self
            .server
            .host
            .trim()
            .parse()
            .map_err(|_| SettingsError::new("server.host", format!("'{}' is not an IP address", self.server.host)))?;
        Ok(ListenConfig::Tcp(SocketAddr::new(ip, self.server.port)))
    }

    /// Resolves and validates the `[scan]` section.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] for a zero interval or window, or an empty
    /// port list.
    pub fn scan_settings(&self) -> Result<ScanSettings, SettingsError> {
        let scan = &self.scan;
        if scan.interval_secs == 0 {
            return Err(SettingsError::new("scan.interval_secs", "must be at least 1"));
        }
        if scan.window_secs == 0 {
            return Err(SettingsError::new("scan.window_secs", "must be at least 1"));
        }
        if scan.ports.is_empty() {
            return Err(SettingsError::new("scan.ports", "at least one port is required"));
        }

        let window = Duration::from_secs(scan.window_secs);
        Ok(ScanSettings {
            interval: Duration::from_secs(scan.interval_secs),
            window,
            timeout: window + SCAN_TIMEOUT_SLACK,
            stale_after: Duration::from_secs(scan.stale_after_secs),
            staleness: self.staleness(),
            ports: scan.ports.clone(),
            probe: scan.probe,
        })
    }

    /// Maps `grace_secs` to a [`StalenessPolicy`].
    pub fn staleness(&self) -> StalenessPolicy {
        match self.scan.grace_secs {
            0 => StalenessPolicy::DropMissing,
            secs => StalenessPolicy::RetainFor(Duration::from_secs(secs)),
        }
    }
}

/// Parses an octal mode such as `"660"` or `"0o660"`.
pub fn parse_socket_mode(raw: &str) -> Result<u32, SettingsError> {
    let digits = raw.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| SettingsError::new("server.socket_mode", format!("'{raw}' is not an octal mode")))?;
    if mode > 0o777 {
        return Err(SettingsError::new(
            "server.socket_mode",
            format!("'{raw}' is larger than 777"),
        ));
    }
    Ok(mode)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
