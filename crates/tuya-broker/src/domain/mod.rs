//! Domain layer for tuya-broker.
//!
//! Device identity, credentials, and presence live in `tuya-core`; this layer
//! only adds the broker's own configuration types.  Nothing here touches the
//! file system or the network: parsing the TOML file is done in
//! `infrastructure::storage`, binding sockets in `infrastructure::transport`.

pub mod config;

pub use config::{
    BrokerConfig, ListenConfig, ScanSettings, SettingsError, StalenessPolicy,
};
