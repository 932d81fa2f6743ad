//! tuya-broker library crate.
//!
//! This crate keeps a live map from Tuya device identifier to current LAN
//! address, joins it with an operator-supplied credential table, and serves
//! the merged result over a small JSON API.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! HTTP client (JSON over TCP or a UNIX socket)
//!         ↕
//! [tuya-broker]
//!   ├── domain/            BrokerConfig, ListenConfig, StalenessPolicy
//!   ├── application/
//!   │     ├── credential_store/  load + atomic reload of the credential table
//!   │     ├── discovery_cache/   the presence snapshot and its transitions
//!   │     ├── scan_cycle/        Scanner seam, single-flight control, scheduler
//!   │     └── directory/         list / get / status (the read side)
//!   └── infrastructure/
//!         ├── udp_scanner/  listens for discovery broadcasts (socket2 + tokio)
//!         ├── storage/      credential file and TOML config file
//!         ├── http_api/     axum router, DTOs, error mapping
//!         └── transport/    TCP or UNIX socket listener, graceful shutdown
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `tuya-core`; it sees the network
//!   and the file system only through the [`application::Scanner`] and
//!   [`application::CredentialSource`] traits.
//! - `infrastructure` implements those traits and owns every socket.
//!
//! # For beginners: who writes, who reads?
//!
//! Exactly one background task writes presence data (the scan scheduler) and
//! only an explicit reload writes credential data.  Everything else reads.
//! Both tables are held as `Arc` snapshots behind a lock that is held only
//! long enough to clone or swap the pointer, so a request never waits for a
//! scan and never sees a half-written table.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: the discovery cache, scan scheduling, and lookups.
pub mod application;

/// Infrastructure layer: UDP scanner, files, HTTP server, listeners.
pub mod infrastructure;
