//! Proxy checker wiring the protocol probes into one verification unit

use crate::proxy::models::{Anonymity, Endpoint};
use crate::proxy::probe;
use async_trait::async_trait;
use std::time::Duration;

/// Deadline for the liveness stage
const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 3;

/// Deadline for the raw CONNECT and SOCKS5 exchanges
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 4;

/// Deadline for full proxied requests (echo and strict HTTP)
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Target for the proxied HEAD request
pub const DEFAULT_LIVENESS_TARGET: &str = "http://www.baidu.com";

/// Target for the CONNECT tunnel probe
pub const DEFAULT_CONNECT_TARGET: &str = "www.baidu.com:443";

/// Endpoint reflecting the caller's address and forwarded headers
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/get";

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub liveness_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// URL requested through the proxy to prove it relays HTTP
    pub liveness_target: String,
    /// `host[:port]` the CONNECT probe asks for
    pub connect_target: String,
    pub echo_url: String,
    /// Use the full GET check (with one retry) instead of the HEAD request
    pub strict_http: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(DEFAULT_LIVENESS_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            liveness_target: DEFAULT_LIVENESS_TARGET.to_string(),
            connect_target: DEFAULT_CONNECT_TARGET.to_string(),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            strict_http: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_liveness_target(mut self, url: String) -> Self {
        self.liveness_target = url;
        self
    }

    pub fn with_connect_target(mut self, target: String) -> Self {
        self.connect_target = target;
        self
    }

    pub fn with_echo_url(mut self, url: String) -> Self {
        self.echo_url = url;
        self
    }

    pub fn with_strict_http(mut self, strict: bool) -> Self {
        self.strict_http = strict;
        self
    }

    pub fn with_timeouts(mut self, liveness: Duration, handshake: Duration, request: Duration) -> Self {
        self.liveness_timeout = liveness;
        self.handshake_timeout = handshake;
        self.request_timeout = request;
        self
    }
}

/// The four checks the verification scheduler runs per candidate
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Cheap gate deciding whether the candidate gets a record at all
    async fn liveness(&self, endpoint: &Endpoint) -> bool;

    async fn https(&self, endpoint: &Endpoint) -> bool;

    async fn socks5(&self, endpoint: &Endpoint) -> bool;

    async fn anonymity(&self, endpoint: &Endpoint) -> Anonymity;
}

/// Prober that talks to candidates over the network
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }
}

#[async_trait]
impl Prober for ProxyChecker {
    async fn liveness(&self, endpoint: &Endpoint) -> bool {
        if self.config.strict_http {
            probe::strict_http(endpoint, &self.config.liveness_target, self.config.request_timeout).await
        } else {
            probe::fast_http(endpoint, &self.config.liveness_target, self.config.liveness_timeout).await
        }
    }

    async fn https(&self, endpoint: &Endpoint) -> bool {
        probe::https_connect(endpoint, &self.config.connect_target, self.config.handshake_timeout).await
    }

    async fn socks5(&self, endpoint: &Endpoint) -> bool {
        probe::socks5_handshake(endpoint, self.config.handshake_timeout).await
    }

    async fn anonymity(&self, endpoint: &Endpoint) -> Anonymity {
        probe::anonymity(endpoint, &self.config.echo_url, self.config.request_timeout).await
    }
}
