//! Sources file: listing platforms to scrape and verification settings

use crate::error::ConfigError;
use crate::proxy::checker::{
    CheckerConfig, DEFAULT_CONNECT_TARGET, DEFAULT_ECHO_URL, DEFAULT_LIVENESS_TARGET,
};
use crate::proxy::scheduler::{SchedulerConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Locations searched for the sources file, in order
pub const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "./config/proxy-sources.toml",
    "../config/proxy-sources.toml",
];

/// Default destination of verified records
pub const DEFAULT_OUTPUT: &str = "ip.txt";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default, rename = "platform")]
    pub platforms: Vec<PlatformConfig>,
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Legacy pool settings; only `debug` is used here
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cron: String,
    #[serde(default, rename = "verifyTime")]
    pub verify_time: u64,
    #[serde(default)]
    pub debug: bool,
}

/// A listing site and the pages to pull from it
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub urls: Vec<String>,
    /// Whether the site itself must be reached through a proxy (informational)
    #[serde(default)]
    pub proxy: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub liveness_target: String,
    pub connect_target: String,
    pub echo_url: String,
    pub strict_http: bool,
    pub output: PathBuf,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            liveness_target: DEFAULT_LIVENESS_TARGET.to_string(),
            connect_target: DEFAULT_CONNECT_TARGET.to_string(),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            strict_http: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl VerifyConfig {
    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_liveness_target(self.liveness_target.clone())
            .with_connect_target(self.connect_target.clone())
            .with_echo_url(self.echo_url.clone())
            .with_strict_http(self.strict_http)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_batch_size(self.batch_size)
            .with_max_workers(self.max_workers)
    }
}

impl HarvestConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Load from the first existing default location
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        Self::load(path)
    }

    /// Load from the first existing location, or use an empty configuration
    /// when none exists. A file that exists but cannot be read or decoded is
    /// still an error.
    pub fn load_or_default<P: AsRef<Path>>(locations: &[P]) -> Result<Self, ConfigError> {
        match locations.iter().map(AsRef::as_ref).find(|path| path.exists()) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
            .ok_or_else(|| {
                ConfigError::NotFound(DEFAULT_CONFIG_LOCATIONS.iter().map(|s| s.to_string()).collect())
            })
    }

    /// Total number of pages across all platforms
    pub fn url_count(&self) -> usize {
        self.platforms.iter().map(|p| p.urls.len()).sum()
    }
}
