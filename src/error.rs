//! Typed errors for probes and configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Why a single probe did not succeed.
///
/// Never surfaces past the probe boundary: callers only see a negative outcome.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors raised while locating or decoding the sources file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found in: {}", .0.join(", "))]
    NotFound(Vec<String>),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
