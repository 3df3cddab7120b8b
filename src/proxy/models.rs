//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candidate proxy endpoint, canonically rendered as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address suitable for a plain TCP dial
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL for using this endpoint as an HTTP proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in {s:?}"))?;
        if host.is_empty() {
            return Err(format!("missing host in {s:?}"));
        }
        let port: u16 = port.parse().map_err(|_| format!("invalid port in {s:?}"))?;
        if port == 0 {
            return Err(format!("port 0 in {s:?}"));
        }
        Ok(Self::new(host, port))
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How much client-identifying information a proxy leaks to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    /// The client's real address is forwarded
    Transparent,
    /// The proxy announces itself but hides the client address
    Common,
    /// No leak detected
    High,
    #[default]
    Unknown,
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Transparent => write!(f, "transparent"),
            Anonymity::Common => write!(f, "common"),
            Anonymity::High => write!(f, "high"),
            Anonymity::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of verifying one live candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    #[serde(rename = "ip")]
    pub endpoint: Endpoint,
    pub http: bool,
    pub https: bool,
    pub socks5: bool,
    pub anonymity: Anonymity,
}

impl ProbeRecord {
    /// Record for a candidate that passed liveness; the remaining outcomes come
    /// from the capability probes.
    pub fn live(endpoint: Endpoint, https: bool, socks5: bool, anonymity: Anonymity) -> Self {
        Self {
            endpoint,
            http: true,
            https,
            socks5,
            anonymity,
        }
    }

    /// Short protocol summary, e.g. `http+https`
    pub fn protocols(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if self.http {
            parts.push("http");
        }
        if self.https {
            parts.push("https");
        }
        if self.socks5 {
            parts.push("socks5");
        }
        parts.join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let endpoint: Endpoint = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 8080);
        assert_eq!(endpoint.to_string(), "127.0.0.1:8080");
        assert_eq!(endpoint.proxy_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!("127.0.0.1".parse::<Endpoint>().is_err());
        assert!("127.0.0.1:70000".parse::<Endpoint>().is_err());
        assert!("127.0.0.1:0".parse::<Endpoint>().is_err());
        assert!(":8080".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let record = ProbeRecord::live(
            Endpoint::new("1.2.3.4", 3128),
            true,
            false,
            Anonymity::High,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"ip":"1.2.3.4:3128","http":true,"https":true,"socks5":false,"anonymity":"high"}"#
        );

        let back: ProbeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_anonymity_serializes() {
        let json = serde_json::to_string(&Anonymity::Unknown).unwrap();
        assert_eq!(json, r#""unknown""#);
        assert_eq!(Anonymity::Transparent.to_string(), "transparent");
    }

    #[test]
    fn test_record_protocols() {
        let record = ProbeRecord::live(Endpoint::new("1.2.3.4", 80), false, true, Anonymity::Common);
        assert_eq!(record.protocols(), "http+socks5");
    }
}
