//! tuya-broker: LAN discovery cache and credential broker for Tuya devices.
//!
//! The broker listens for the UDP broadcasts that idle Tuya devices send,
//! keeps a table of which device is at which LAN address, joins it with an
//! operator-maintained credential file, and answers lookups over a small JSON
//! API.  Clients that want to talk to a device locally ask the broker where
//! the device is and which protocol version it speaks.
//!
//! # Usage
//!
//! ```text
//! tuya-broker [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML config file
//!   --devices-file <PATH>    Credential table (JSON) [default: tuya-devices.json]
//!   --host <IP>              HTTP bind address [default: 0.0.0.0]
//!   --port <PORT>            HTTP port [default: 1024]
//!   --unix-socket <PATH>     Serve on a UNIX socket instead of TCP
//!   --socket-mode <OCTAL>    Permission bits for the UNIX socket, e.g. 660
//!   --scan-interval <SECS>   Seconds between scans [default: 60]
//!   --scan-window <SECS>     Seconds each scan listens [default: 10]
//!   --grace <SECS>           Keep unseen devices this long, tagged stale [default: 0]
//!   --expose-local-keys      Include local keys in API responses
//! ```
//!
//! # Environment variable overrides
//!
//! Every flag can also come from the environment.  Precedence, highest
//! first: CLI flag, environment variable, config file, built-in default.
//!
//! | Variable                         | Flag                  |
//! |----------------------------------|-----------------------|
//! | `TUYA_BROKER_CONFIG`             | `--config`            |
//! | `TUYA_BROKER_DEVICES_FILE`       | `--devices-file`      |
//! | `TUYA_BROKER_HOST`               | `--host`              |
//! | `TUYA_BROKER_PORT`               | `--port`              |
//! | `TUYA_BROKER_UNIX_SOCKET`        | `--unix-socket`       |
//! | `TUYA_BROKER_SOCKET_MODE`        | `--socket-mode`       |
//! | `TUYA_BROKER_SCAN_INTERVAL`      | `--scan-interval`     |
//! | `TUYA_BROKER_SCAN_WINDOW`        | `--scan-window`       |
//! | `TUYA_BROKER_GRACE`              | `--grace`             |
//! | `TUYA_BROKER_EXPOSE_LOCAL_KEYS`  | `--expose-local-keys` |
//!
//! `RUST_LOG` overrides the config file's `log_level`.
//!
//! # Signals
//!
//! - `SIGINT` / `SIGTERM`: stop scanning, drain in-flight requests, exit.
//! - `SIGHUP`: reload the credential file (same as `POST /reload`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tuya_broker::application::{
    CredentialStore, DeviceDirectory, DiscoveryCache, ScanControl, ScanScheduler,
};
use tuya_broker::domain::BrokerConfig;
use tuya_broker::infrastructure::{
    bind, load_config_file, router, serve, ApiState, FileCredentialSource, UdpScanner,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN discovery cache and credential broker for Tuya Wi-Fi devices.
///
/// Every option is `Option<_>` so that an absent flag leaves the config
/// file's value (or its default) in place.
#[derive(Debug, Parser)]
#[command(
    name = "tuya-broker",
    about = "LAN discovery cache and credential broker for Tuya Wi-Fi devices",
    version
)]
struct Cli {
    /// TOML config file.  Without it every setting takes its default.
    #[arg(long, env = "TUYA_BROKER_CONFIG")]
    config: Option<PathBuf>,

    /// JSON credential table: `{"<id>": {"name", "local_key", "version"}}`.
    #[arg(long, env = "TUYA_BROKER_DEVICES_FILE")]
    devices_file: Option<PathBuf>,

    /// IP address for the HTTP API.
    #[arg(long, env = "TUYA_BROKER_HOST")]
    host: Option<String>,

    /// TCP port for the HTTP API.
    #[arg(long, env = "TUYA_BROKER_PORT")]
    port: Option<u16>,

    /// Serve on this UNIX domain socket instead of TCP.
    #[arg(long, env = "TUYA_BROKER_UNIX_SOCKET", conflicts_with_all = ["host", "port"])]
    unix_socket: Option<PathBuf>,

    /// Octal permission bits applied to the UNIX socket after binding.
    #[arg(long, env = "TUYA_BROKER_SOCKET_MODE")]
    socket_mode: Option<String>,

    /// Seconds between scheduled scans.
    #[arg(long, env = "TUYA_BROKER_SCAN_INTERVAL")]
    scan_interval: Option<u64>,

    /// Seconds each scan listens for broadcasts.
    #[arg(long, env = "TUYA_BROKER_SCAN_WINDOW")]
    scan_window: Option<u64>,

    /// Seconds to keep a device missing from the latest scan.  0 drops it.
    #[arg(long, env = "TUYA_BROKER_GRACE")]
    grace: Option<u64>,

    /// Include each device's local key in API responses.
    #[arg(long, env = "TUYA_BROKER_EXPOSE_LOCAL_KEYS")]
    expose_local_keys: bool,
}

impl Cli {
    /// Loads the config file (if any) and applies the CLI overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` names a file that cannot be read or
    /// parsed.
    fn into_broker_config(self) -> anyhow::Result<BrokerConfig> {
        let mut config = load_config_file(self.config.as_deref())
            .context("failed to load the broker config file")?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(self, config: &mut BrokerConfig) {
        if let Some(path) = self.devices_file {
            config.credentials.path = path;
        }
        // An explicit TCP address on the command line beats a socket path
        // from the file.
        if self.host.is_some() || self.port.is_some() {
            config.server.unix_socket = None;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = self.unix_socket {
            config.server.unix_socket = Some(path);
        }
        if let Some(mode) = self.socket_mode {
            config.server.socket_mode = Some(mode);
        }
        if let Some(secs) = self.scan_interval {
            config.scan.interval_secs = secs;
        }
        if let Some(secs) = self.scan_window {
            config.scan.window_secs = secs;
        }
        if let Some(secs) = self.grace {
            config.scan.grace_secs = secs;
        }
        if self.expose_local_keys {
            config.server.expose_local_keys = true;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged with the config file.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, or from the
///    config's `log_level` when `RUST_LOG` is unset.
/// 3. The credential table is loaded.  A bad file is fatal here; later
///    reloads keep the previous table instead.
/// 4. The API listener is bound.  Failure is fatal.
/// 5. The scan scheduler is spawned; its first scan starts immediately.
/// 6. A signal task is spawned: SIGINT/SIGTERM cancel the shared
///    `CancellationToken`, SIGHUP reloads credentials.
/// 7. The API is served until the token is cancelled.  Then the scheduler is
///    awaited so the process exits only after the current scan finishes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_broker_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log_level '{}'", config.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Resolve settings ──────────────────────────────────────────────────────
    let settings = config.scan_settings().context("invalid [scan] settings")?;
    let listen = config.listen().context("invalid [server] settings")?;

    // ── Credential table ──────────────────────────────────────────────────────
    let source = Arc::new(FileCredentialSource::new(&config.credentials.path));
    let credentials = Arc::new(CredentialStore::load(source).with_context(|| {
        format!(
            "failed to load credential table {}",
            config.credentials.path.display()
        )
    })?);

    // ── Shared state ──────────────────────────────────────────────────────────
    let cache = Arc::new(DiscoveryCache::new(settings.staleness));
    let control = Arc::new(ScanControl::new());
    let directory = Arc::new(DeviceDirectory::new(
        Arc::clone(&credentials),
        Arc::clone(&cache),
        Arc::clone(&control),
        settings.stale_after,
    ));

    // ── Listener ──────────────────────────────────────────────────────────────
    let listener = bind(&listen).await.context("failed to bind the API listener")?;
    info!(
        listen = %listener.describe(),
        devices = credentials.snapshot().table.len(),
        expose_local_keys = config.server.expose_local_keys,
        "tuya-broker starting"
    );

    let shutdown = CancellationToken::new();

    // ── Background scanning ───────────────────────────────────────────────────
    let scanner = Arc::new(UdpScanner::new(&settings));
    let scheduler = ScanScheduler::new(scanner, cache, Arc::clone(&control), settings);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    // ── Signals ───────────────────────────────────────────────────────────────
    let signals = Signals::install().context("failed to install signal handlers")?;
    tokio::spawn(signals.run(Arc::clone(&credentials), shutdown.clone()));

    // ── Serve ─────────────────────────────────────────────────────────────────
    let app = router(ApiState {
        directory,
        credentials,
        control,
        expose_local_keys: config.server.expose_local_keys,
    });
    let served = serve(listener, app, shutdown.clone()).await;

    // Whatever stopped the server also stops scanning.
    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "scan scheduler task ended abnormally");
    }

    served.context("API server failed")?;
    info!("tuya-broker stopped");
    Ok(())
}

// ── Signal handling ───────────────────────────────────────────────────────────

/// Signal streams, registered before serving so an early SIGHUP is not lost.
struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn run(mut self, credentials: Arc<CredentialStore>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "failed to listen for Ctrl+C");
                        continue;
                    }
                    info!("received Ctrl+C; shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = self.terminate.recv() => {
                    info!("received SIGTERM; shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = self.hangup.recv() => {
                    info!("received SIGHUP; reloading credentials");
                    reload_credentials(Arc::clone(&credentials)).await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run(self, _credentials: Arc<CredentialStore>, shutdown: CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("received Ctrl+C; shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "failed to listen for Ctrl+C"),
            },
        }
    }
}

#[cfg(unix)]
async fn reload_credentials(credentials: Arc<CredentialStore>) {
    match tokio::task::spawn_blocking(move || credentials.reload()).await {
        Ok(Ok(devices)) => info!(devices, "credentials reloaded"),
        Ok(Err(e)) => warn!(error = %e, "credential reload failed; keeping previous table"),
        Err(e) => error!(error = %e, "credential reload task failed"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
