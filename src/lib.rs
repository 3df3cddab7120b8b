//! Proxy Harvester - open proxy discovery and verification
//!
//! Scrapes proxy listing pages, extracts candidate `host:port` endpoints and
//! verifies each one's HTTP, HTTPS tunnel and SOCKS5 support and anonymity
//! level with a bounded pool of concurrent probes.

pub mod config;
pub mod error;
pub mod proxy;
pub mod tui;

pub use config::HarvestConfig;
pub use error::{ConfigError, ProbeError};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
