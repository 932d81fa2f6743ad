//! File-backed storage: the JSON credential file and the TOML config file.
//!
//! The credential file is plain JSON keyed by device identifier, the shape
//! device-setup tooling exports.  Broker settings are TOML.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tuya_core::{ConfigError, CredentialTable};

use crate::application::CredentialSource;
use crate::domain::BrokerConfig;

// ── Credential file ───────────────────────────────────────────────────────────

/// Reads the credential table from a JSON file on every `load`.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for FileCredentialSource {
    fn load(&self) -> Result<CredentialTable, ConfigError> {
        let bytes = std::fs::read(&self.path).map_err(|source| ConfigError::Io {
            origin: self.path.display().to_string(),
            source,
        })?;
        CredentialTable::from_json(&bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ── Broker config file ────────────────────────────────────────────────────────

/// Error type for reading the TOML config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed or contains unknown keys.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Loads the broker config.  `None` means "no file": every value takes its
/// default.  An explicitly named file that does not exist is an error.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if the TOML is malformed.
pub fn load_config_file(path: Option<&Path>) -> Result<BrokerConfig, ConfigFileError> {
    let Some(path) = path else {
        return Ok(BrokerConfig::default());
    };

    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses TOML text into a [`BrokerConfig`].
pub fn parse_config(content: &str) -> Result<BrokerConfig, toml::de::Error> {
    toml::from_str(content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
