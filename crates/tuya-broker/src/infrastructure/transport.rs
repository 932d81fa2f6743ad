//! Listener setup and the serve loop.
//!
//! The API is served either on a TCP address or on a UNIX domain socket.
//!
//! # UNIX socket lifecycle
//!
//! 1. A socket file left behind by a previous run is unlinked.  Any other
//!    kind of file at that path is left alone and binding fails.
//! 2. The socket is bound fresh, so it never inherits permissions from an
//!    earlier run.
//! 3. The configured mode is applied to the new file.
//! 4. On clean shutdown the file is removed.
//!
//! Access control on the socket is the deployment's only authentication, so
//! step 3 runs on every start.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::ListenConfig;

/// Failures binding or serving the API listener.  Fatal to the process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("refusing to replace {path}: it exists and is not a socket")]
    NotASocket { path: PathBuf },

    #[error("failed to set permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("UNIX domain sockets are not supported on this platform")]
    Unsupported,

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// A bound listener, ready for [`serve`].
#[derive(Debug)]
pub enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl BoundListener {
    /// Local TCP address, if this is a TCP listener.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            BoundListener::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            BoundListener::Unix { .. } => None,
        }
    }

    /// Human-readable listen location for logs.
    pub fn describe(&self) -> String {
        match self {
            BoundListener::Tcp(l) => l
                .local_addr()
                .map(|a| format!("http://{a}"))
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            BoundListener::Unix { path, .. } => format!("unix:{}", path.display()),
        }
    }
}

/// Binds the listener described by `listen`.
///
/// # Errors
///
/// Returns [`TransportError`] if the address or socket path cannot be
/// bound or the socket mode cannot be applied.
pub async fn bind(listen: &ListenConfig) -> Result<BoundListener, TransportError> {
    match listen {
        ListenConfig::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: addr.to_string(),
                    source,
                })?;
            Ok(BoundListener::Tcp(listener))
        }
        ListenConfig::Unix { path, mode } => bind_unix(path, *mode),
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path, mode: Option<u32>) -> Result<BoundListener, TransportError> {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path).map_err(|source| TransportError::Bind {
                addr: path.display().to_string(),
                source,
            })?;
            info!(path = %path.display(), "removed stale socket file");
        }
        Ok(_) => {
            return Err(TransportError::NotASocket {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(TransportError::Bind {
                addr: path.display().to_string(),
                source,
            })
        }
    }

    let listener = tokio::net::UnixListener::bind(path).map_err(|source| TransportError::Bind {
        addr: path.display().to_string(),
        source,
    })?;

    if let Some(mode) = mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(
            |source| TransportError::Permissions {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }

    Ok(BoundListener::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn bind_unix(_path: &Path, _mode: Option<u32>) -> Result<BoundListener, TransportError> {
    Err(TransportError::Unsupported)
}

/// Serves `app` until `shutdown` is cancelled, then lets in-flight requests
/// finish.  A UNIX socket file is removed afterwards.
///
/// # Errors
///
/// Returns [`TransportError::Serve`] if the accept loop fails.
pub async fn serve(
    listener: BoundListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let signal = async move { shutdown.cancelled().await };
    match listener {
        BoundListener::Tcp(listener) => axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(TransportError::Serve),
        #[cfg(unix)]
        BoundListener::Unix { listener, path } => {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
                .map_err(TransportError::Serve);
            remove_socket_file(&path);
            result
        }
    }
}

#[cfg(unix)]
fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove socket file"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
