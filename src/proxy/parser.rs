//! Parser for previously persisted result files
//!
//! Result files written over time come in three shapes:
//! - bare `IP:PORT` lines
//! - one JSON object per line with `"ip"` (optionally `IP:PORT`) and/or `"port"`
//! - the same JSON object wrapped in an extra layer of string quoting

use crate::proxy::models::Endpoint;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;

static BARE_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:\d{1,3}\.){3}\d{1,3}:\d{1,5})$").expect("Invalid bare line regex")
});

static IP_FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""ip"\s*:\s*"((?:\d{1,3}\.){3}\d{1,3}(?::\d{1,5})?)""#)
        .expect("Invalid ip field regex")
});

static PORT_FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""port"\s*:\s*"?(\d{1,5})"?"#).expect("Invalid port field regex")
});

/// Parser for the legacy line-oriented result store
pub struct HistoryParser;

impl HistoryParser {
    /// Parse a single stored line, skipping anything unrecognised
    pub fn parse_line(line: &str) -> Option<Endpoint> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.contains('{') && line.contains('}') {
            Self::parse_json_line(line)
        } else if BARE_LINE_REGEX.is_match(line) {
            line.parse().ok()
        } else {
            None
        }
    }

    fn parse_json_line(line: &str) -> Option<Endpoint> {
        let unquoted = Self::unquote(line);
        let line = unquoted.as_deref().unwrap_or(line);

        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
            if let Some(Value::String(ip)) = map.get("ip") {
                if ip.contains(':') {
                    return ip.parse().ok();
                }
                let port = match map.get("port")? {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => return None,
                };
                return format!("{}:{}", ip, port).parse().ok();
            }
        }

        // Truncated or otherwise undecodable JSON: pull the fields out directly
        let caps = IP_FIELD_REGEX.captures(line)?;
        let ip = caps.get(1)?.as_str();
        if ip.contains(':') {
            return ip.parse().ok();
        }
        let port = PORT_FIELD_REGEX.captures(line)?.get(1)?.as_str().to_string();
        format!("{}:{}", ip, port).parse().ok()
    }

    /// Remove one layer of JSON string quoting, e.g. `"{\"ip\":...}"`
    fn unquote(line: &str) -> Option<String> {
        if line.len() >= 2 && line.starts_with('"') && line.ends_with('"') {
            serde_json::from_str::<String>(line).ok()
        } else {
            None
        }
    }

    /// Parse every recognised line of a store's content
    pub fn parse_string(content: &str) -> Vec<Endpoint> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    /// Parse a store file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content))
    }
}
