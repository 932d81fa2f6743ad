//! Infrastructure layer for tuya-broker.
//!
//! Contains the OS-facing adapters: the UDP discovery scanner, the credential
//! and config files, the axum router, and the TCP / UNIX socket listener.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `tuya_core`, but MUST NOT be imported by the `application` or `domain`
//! layers.

pub mod http_api;
pub mod storage;
pub mod transport;
pub mod udp_scanner;

pub use http_api::{router, ApiState};
pub use storage::{load_config_file, ConfigFileError, FileCredentialSource};
pub use transport::{bind, serve, BoundListener, TransportError};
pub use udp_scanner::UdpScanner;
