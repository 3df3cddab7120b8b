//! Protocol-level probes against a single candidate
//!
//! Every probe carries its own deadlines and reports failure as a negative
//! outcome. The `try_*` variants keep the reason so callers can log it.

use crate::error::ProbeError;
use crate::proxy::models::{Anonymity, Endpoint};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::{redirect, Client, Proxy as ReqwestProxy, Response};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SOCKS5 greeting: version 5, one method, "no authentication"
const SOCKS5_GREETING: [u8; 3] = [0x05, 0x01, 0x00];

/// Method byte a SOCKS5 server returns when none of the offered methods fit
const SOCKS5_NO_ACCEPTABLE_METHODS: u8 = 0xFF;

/// Bytes read back from a CONNECT request
const CONNECT_REPLY_LIMIT: usize = 256;

/// Bytes of the echo body inspected for anonymity
pub const ECHO_BODY_LIMIT: usize = 2048;

/// Retries performed by the strict HTTP check after the first attempt
const STRICT_HTTP_RETRIES: usize = 1;

static DOTTED_QUAD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}").expect("Invalid dotted quad regex")
});

/// Comma-separated address list such as a forwarded `origin`
static ADDRESS_LIST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}(?:\s*,\s*[0-9]{1,3}(?:\.[0-9]{1,3}){3})+")
        .expect("Invalid address list regex")
});

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ProbeError::Timeout(deadline))?
        .map_err(ProbeError::from)
}

async fn dial(endpoint: &Endpoint, deadline: Duration) -> Result<TcpStream, ProbeError> {
    with_deadline(deadline, TcpStream::connect(endpoint.addr())).await
}

/// Client that routes every request through the candidate as an HTTP proxy
fn proxied_client(endpoint: &Endpoint, timeout: Duration) -> Result<reqwest::ClientBuilder, ProbeError> {
    let proxy = ReqwestProxy::all(endpoint.proxy_url())?;
    Ok(Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .connect_timeout(timeout)
        .pool_max_idle_per_host(0))
}

/// Reachability plus a minimal proxied HEAD request.
///
/// Succeeds when the proxy answers with a status in `[200, 400)`.
pub async fn try_fast_http(
    endpoint: &Endpoint,
    target: &str,
    timeout: Duration,
) -> Result<bool, ProbeError> {
    drop(dial(endpoint, timeout).await?);

    let client = proxied_client(endpoint, timeout)?
        .http1_only()
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .redirect(redirect::Policy::none())
        .build()?;

    let response = client
        .head(target)
        .header(USER_AGENT, "Mozilla/5.0")
        .send()
        .await?;

    let status = response.status();
    if !(200..400).contains(&status.as_u16()) {
        return Err(ProbeError::Rejected(format!("status {}", status)));
    }
    Ok(true)
}

pub async fn fast_http(endpoint: &Endpoint, target: &str, timeout: Duration) -> bool {
    outcome(endpoint, "fast http", try_fast_http(endpoint, target, timeout).await)
}

/// Full GET through the proxy; succeeds when any body comes back.
///
/// Performs a single retry on failure.
pub async fn try_strict_http(
    endpoint: &Endpoint,
    target: &str,
    timeout: Duration,
) -> Result<bool, ProbeError> {
    let client = proxied_client(endpoint, timeout)?
        .danger_accept_invalid_certs(true)
        .build()?;

    let mut last_err = None;
    for _ in 0..=STRICT_HTTP_RETRIES {
        let attempt = async {
            let response = client
                .get(target)
                .header(
                    USER_AGENT,
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
                )
                .send()
                .await?;
            response.bytes().await
        };
        match attempt.await {
            Ok(body) if !body.is_empty() => return Ok(true),
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => Err(e.into()),
        None => Ok(false),
    }
}

pub async fn strict_http(endpoint: &Endpoint, target: &str, timeout: Duration) -> bool {
    outcome(endpoint, "strict http", try_strict_http(endpoint, target, timeout).await)
}

/// Normalise a CONNECT target to `host:port`.
///
/// A bare name without a dot gets a `www.` prefix and a missing port means 443.
pub fn normalize_connect_target(target: &str) -> String {
    let (domain, port) = match target.split_once(':') {
        Some((domain, port)) => (domain, port),
        None => (target, "443"),
    };
    if !domain.starts_with("www.") && !domain.contains('.') {
        format!("www.{}:{}", domain, port)
    } else {
        format!("{}:{}", domain, port)
    }
}

/// Ask the proxy to open a tunnel with `CONNECT`; no TLS handshake follows.
pub async fn try_https_connect(
    endpoint: &Endpoint,
    target: &str,
    timeout: Duration,
) -> Result<bool, ProbeError> {
    let mut stream = dial(endpoint, timeout).await?;
    let target = normalize_connect_target(target);
    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nUser-Agent: Mozilla/5.0\r\nConnection: keep-alive\r\n\r\n"
    );
    with_deadline(timeout, stream.write_all(request.as_bytes())).await?;

    let mut buf = [0u8; CONNECT_REPLY_LIMIT];
    let read = with_deadline(timeout, stream.read(&mut buf)).await?;
    let reply = String::from_utf8_lossy(&buf[..read]);
    if !reply.contains("200") {
        let status_line = reply.lines().next().unwrap_or_default().trim();
        return Err(ProbeError::Rejected(format!("CONNECT answered {:?}", status_line)));
    }
    Ok(true)
}

pub async fn https_connect(endpoint: &Endpoint, target: &str, timeout: Duration) -> bool {
    outcome(endpoint, "https connect", try_https_connect(endpoint, target, timeout).await)
}

/// SOCKS5 method negotiation
pub async fn try_socks5_handshake(endpoint: &Endpoint, timeout: Duration) -> Result<bool, ProbeError> {
    let mut stream = dial(endpoint, timeout).await?;
    with_deadline(timeout, stream.write_all(&SOCKS5_GREETING)).await?;

    let mut reply = [0u8; 2];
    with_deadline(timeout, stream.read_exact(&mut reply)).await?;
    match reply {
        [0x05, SOCKS5_NO_ACCEPTABLE_METHODS] => Err(ProbeError::Rejected(
            "no acceptable authentication method".to_string(),
        )),
        [0x05, _] => Ok(true),
        [version, _] => Err(ProbeError::Rejected(format!(
            "unexpected SOCKS version {:#04x}",
            version
        ))),
    }
}

pub async fn socks5_handshake(endpoint: &Endpoint, timeout: Duration) -> bool {
    outcome(endpoint, "socks5", try_socks5_handshake(endpoint, timeout).await)
}

/// Classify an echo response body.
///
/// Only a comma-separated address list (the forwarded `origin`) can mark a
/// proxy transparent; addresses elsewhere, such as in the echoed URL, do not.
pub fn classify_anonymity(body: &str) -> Anonymity {
    if !body.contains("\"url\"") {
        return Anonymity::Unknown;
    }

    let forwarded = ADDRESS_LIST_REGEX.find_iter(body).any(|list| {
        let addresses: HashSet<&str> = DOTTED_QUAD_REGEX
            .find_iter(list.as_str())
            .map(|m| m.as_str())
            .collect();
        addresses.len() >= 2
    });
    if forwarded {
        return Anonymity::Transparent;
    }

    if body.to_ascii_lowercase().contains("keep-alive") {
        return Anonymity::Common;
    }

    Anonymity::High
}

async fn read_prefix(mut response: Response, limit: usize) -> Result<Vec<u8>, ProbeError> {
    let mut body = Vec::with_capacity(limit);
    while body.len() < limit {
        match response.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(body)
}

/// Fetch the echo endpoint through the proxy and classify what leaked
pub async fn try_anonymity(
    endpoint: &Endpoint,
    echo_url: &str,
    timeout: Duration,
) -> Result<Anonymity, ProbeError> {
    let client = proxied_client(endpoint, timeout)?
        .danger_accept_invalid_certs(true)
        .build()?;

    let response = client
        .get(echo_url)
        .header("Proxy-Connection", "keep-alive")
        .send()
        .await?;

    let body = read_prefix(response, ECHO_BODY_LIMIT).await?;
    Ok(classify_anonymity(&String::from_utf8_lossy(&body)))
}

pub async fn anonymity(endpoint: &Endpoint, echo_url: &str, timeout: Duration) -> Anonymity {
    match try_anonymity(endpoint, echo_url, timeout).await {
        Ok(level) => level,
        Err(e) => {
            debug!("{} anonymity probe failed: {}", endpoint, e);
            Anonymity::Unknown
        }
    }
}

fn outcome(endpoint: &Endpoint, probe: &str, result: Result<bool, ProbeError>) -> bool {
    match result {
        Ok(ok) => ok,
        Err(e) => {
            debug!("{} {} probe failed: {}", endpoint, probe, e);
            false
        }
    }
}
