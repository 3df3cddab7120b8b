//! Endpoint extraction from raw listing pages
//!
//! Listing sites publish proxies in very different shapes: plain `ip:port`
//! text dumps, HTML tables with the address and port in separate cells, or
//! JSON blobs embedded in scripts. The extractor tries three strategies in a
//! fixed order and stops at the first one that yields anything.

use crate::proxy::models::Endpoint;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// `ip:port` anywhere in the content, even between letters or CJK text.
/// The address may not continue a longer digit/dot run; the port takes every
/// following digit so that `1.2.3.4:123456` fails range validation.
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9.])((?:[0-9]{1,3}\.){3}[0-9]{1,3}):([0-9]+)")
        .expect("Invalid IP:PORT regex")
});

/// Dotted quad with every octet in 0-255
static STRICT_IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(?:\.(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3}\b")
        .expect("Invalid strict IPv4 regex")
});

static PORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9]{1,5})\b").expect("Invalid port regex"));

/// `"host":"1.2.3.4", ... "port":8080`
static QUOTED_HOST_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""host"\s*:\s*"((?:\d{1,3}\.){3}\d{1,3})".*?"port"\s*:\s*(\d{1,5})"#)
        .expect("Invalid quoted host/port regex")
});

/// `host: 1.2.3.4 ... port: 8080`
static LOOSE_HOST_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"host\s*:\s*"?((?:\d{1,3}\.){3}\d{1,3})"?.*?port\s*:\s*(\d{1,5})"#)
        .expect("Invalid loose host/port regex")
});

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table tr").expect("Invalid row selector"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));

/// Which extraction strategy produced the candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectPattern,
    TableRows,
    EmbeddedData,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::DirectPattern => write!(f, "direct pattern"),
            Strategy::TableRows => write!(f, "table rows"),
            Strategy::EmbeddedData => write!(f, "embedded data"),
        }
    }
}

/// Candidates found in one piece of content
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub endpoints: Vec<Endpoint>,
    /// `None` when no strategy matched anything
    pub strategy: Option<Strategy>,
}

/// Cascading endpoint extractor
pub struct EndpointExtractor;

impl EndpointExtractor {
    /// Extract candidates, returning only the endpoints
    pub fn extract(content: &str) -> Vec<Endpoint> {
        Self::extract_detailed(content).endpoints
    }

    /// Extract candidates and report which strategy produced them.
    ///
    /// The result keeps source order and may contain duplicates.
    pub fn extract_detailed(content: &str) -> Extraction {
        let endpoints = Self::scan_direct(content);
        if !endpoints.is_empty() {
            return Extraction {
                endpoints,
                strategy: Some(Strategy::DirectPattern),
            };
        }

        info!("no inline ip:port found, parsing table rows");
        let endpoints = Self::scan_table(content);
        if !endpoints.is_empty() {
            return Extraction {
                endpoints,
                strategy: Some(Strategy::TableRows),
            };
        }

        info!("no table rows matched, scanning embedded host/port data");
        let endpoints = Self::scan_embedded(content);
        if !endpoints.is_empty() {
            return Extraction {
                endpoints,
                strategy: Some(Strategy::EmbeddedData),
            };
        }

        Extraction::default()
    }

    /// Strategy 1: `ip:port` pairs anywhere in the text
    pub fn scan_direct(content: &str) -> Vec<Endpoint> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| validated(cap.get(1)?.as_str(), cap.get(2)?.as_str()))
            .collect()
    }

    /// Strategy 2: address and port in separate cells of the same table row
    pub fn scan_table(content: &str) -> Vec<Endpoint> {
        let document = Html::parse_document(content);
        let mut endpoints = Vec::new();

        for row in document.select(&ROW_SELECTOR) {
            let mut ip: Option<Ipv4Addr> = None;
            let mut port: Option<u16> = None;

            for cell in row.select(&CELL_SELECTOR) {
                if ip.is_some() && port.is_some() {
                    break;
                }
                let text = cell.text().collect::<String>();
                let text = text.trim();

                if ip.is_none() {
                    if let Some(found) = STRICT_IPV4_REGEX
                        .find(text)
                        .and_then(|m| m.as_str().parse::<Ipv4Addr>().ok())
                    {
                        ip = Some(found);
                        // the octets of the address cell are not port candidates
                        continue;
                    }
                }

                if port.is_none() {
                    port = PORT_REGEX
                        .captures_iter(text)
                        .filter_map(|cap| parse_port(cap.get(1)?.as_str()))
                        .next();
                }
            }

            if let (Some(ip), Some(port)) = (ip, port) {
                debug!("table row yielded {}:{}", ip, port);
                endpoints.push(Endpoint::new(ip.to_string(), port));
            }
        }

        info!("extracted {} endpoints from table rows", endpoints.len());
        endpoints
    }

    /// Strategy 3: `host`/`port` pairs inside embedded JSON or script data
    pub fn scan_embedded(content: &str) -> Vec<Endpoint> {
        let normalized = content.replace("\\\"", "\"");

        let mut endpoints = host_port_matches(&normalized);

        if endpoints.is_empty() {
            debug!("whole-content scan found nothing, retrying line by line");
            endpoints = normalized
                .lines()
                .filter(|line| line.contains("host") && line.contains("port"))
                .flat_map(host_port_matches)
                .collect();
        }

        info!("extracted {} endpoints from embedded data", endpoints.len());
        endpoints
    }
}

fn host_port_matches(text: &str) -> Vec<Endpoint> {
    [&*QUOTED_HOST_PORT_REGEX, &*LOOSE_HOST_PORT_REGEX]
        .into_iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|cap| validated(cap.get(1)?.as_str(), cap.get(2)?.as_str()))
        .collect()
}

/// Build an endpoint only if the address is a valid IPv4 and the port in range
fn validated(host: &str, port: &str) -> Option<Endpoint> {
    let ip: Ipv4Addr = host.parse().ok()?;
    let port = parse_port(port)?;
    Some(Endpoint::new(ip.to_string(), port))
}

fn parse_port(s: &str) -> Option<u16> {
    match s.parse::<u32>() {
        Ok(n) if (1..=65535).contains(&n) => Some(n as u16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(endpoints: &[Endpoint]) -> Vec<String> {
        endpoints.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_direct_pattern() {
        let content = "Here is a proxy: 192.168.1.1:8080 and another one 10.0.0.1:3128.";
        let extraction = EndpointExtractor::extract_detailed(content);
        assert_eq!(extraction.strategy, Some(Strategy::DirectPattern));
        assert_eq!(keys(&extraction.endpoints), vec!["192.168.1.1:8080", "10.0.0.1:3128"]);
    }

    #[test]
    fn test_direct_pattern_keeps_duplicates() {
        let content = "10.0.0.1:8080\n10.0.0.1:8080\n";
        assert_eq!(EndpointExtractor::extract(content).len(), 2);
    }

    #[test]
    fn test_invalid_octet_never_extracted() {
        let content = "999.1.1.1:80";
        assert!(EndpointExtractor::scan_direct(content).is_empty());
        assert!(EndpointExtractor::extract(content).is_empty());

        let table = "<table><tr><td>999.1.1.1</td><td>80</td></tr></table>";
        assert!(EndpointExtractor::extract(table).is_empty());

        let json = r#"{"host":"999.1.1.1","port":80}"#;
        assert!(EndpointExtractor::extract(json).is_empty());
    }

    #[test]
    fn test_port_out_of_range_never_extracted() {
        assert!(EndpointExtractor::extract("10.0.0.1:70000").is_empty());
        assert!(EndpointExtractor::extract("10.0.0.1:0").is_empty());

        let json = r#"{"host":"10.0.0.1","port":70000}"#;
        assert!(EndpointExtractor::extract(json).is_empty());
    }

    #[test]
    fn test_valid_endpoint_extracted_by_direct_pattern() {
        let extraction = EndpointExtractor::extract_detailed("10.0.0.1:8080");
        assert_eq!(extraction.strategy, Some(Strategy::DirectPattern));
        assert_eq!(keys(&extraction.endpoints), vec!["10.0.0.1:8080"]);
    }

    #[test]
    fn test_direct_pattern_next_to_word_characters() {
        assert_eq!(keys(&EndpointExtractor::extract("1.2.3.4:8080高匿")), vec!["1.2.3.4:8080"]);
        assert_eq!(keys(&EndpointExtractor::extract("代理1.2.3.4:8080")), vec!["1.2.3.4:8080"]);
        assert_eq!(keys(&EndpointExtractor::extract("ip1.2.3.4:8080")), vec!["1.2.3.4:8080"]);
        assert_eq!(keys(&EndpointExtractor::extract("10.0.0.1:8080abc")), vec!["10.0.0.1:8080"]);

        let page = "<li>114.231.8.18:8089高匿名</li><li>地址:183.164.242.2:8089 HTTP</li>";
        let extraction = EndpointExtractor::extract_detailed(page);
        assert_eq!(extraction.strategy, Some(Strategy::DirectPattern));
        assert_eq!(
            keys(&extraction.endpoints),
            vec!["114.231.8.18:8089", "183.164.242.2:8089"]
        );
    }

    #[test]
    fn test_direct_pattern_rejects_longer_digit_runs() {
        assert!(EndpointExtractor::scan_direct("1234.1.1.1:80").is_empty());
        assert!(EndpointExtractor::scan_direct("1.1.1.1.1:80").is_empty());
        assert!(EndpointExtractor::scan_direct("1.2.3.4:123456").is_empty());
        assert_eq!(
            keys(&EndpointExtractor::scan_direct("1.1.1.1:80,2.2.2.2:81")),
            vec!["1.1.1.1:80", "2.2.2.2:81"]
        );
    }

    #[test]
    fn test_cascade_stops_after_direct_match() {
        let content = r#"
10.0.0.1:8080
<table><tr><td>192.168.1.1</td><td>3128</td></tr>
<tr><td>broken <td>172.16.0.1<td>
"#;
        let extraction = EndpointExtractor::extract_detailed(content);
        assert_eq!(extraction.strategy, Some(Strategy::DirectPattern));
        assert_eq!(keys(&extraction.endpoints), vec!["10.0.0.1:8080"]);
    }

    #[test]
    fn test_table_rows() {
        let content = r#"
<html><body>
<table>
<tr><th>IP</th><th>Port</th></tr>
<tr><td>192.168.1.1</td><td>8080</td><td>US</td></tr>
<tr><td> 10.0.0.2 </td><td>3128</td></tr>
<tr><td>no address here</td><td>80</td></tr>
<tr><td>172.16.0.1</td><td>not a port</td></tr>
</table>
</body></html>
"#;
        let extraction = EndpointExtractor::extract_detailed(content);
        assert_eq!(extraction.strategy, Some(Strategy::TableRows));
        assert_eq!(keys(&extraction.endpoints), vec!["192.168.1.1:8080", "10.0.0.2:3128"]);
    }

    #[test]
    fn test_table_first_port_wins() {
        let content = "<table><tr><td>1.2.3.4</td><td>99999 8080</td><td>3128</td></tr></table>";
        assert_eq!(keys(&EndpointExtractor::scan_table(content)), vec!["1.2.3.4:8080"]);
    }

    #[test]
    fn test_embedded_quoted_json() {
        let content = r#"<script>var data = [{"host":"10.1.1.1","port":8080},{"host":"10.1.1.2", "port": 1080}];</script>"#;
        let extraction = EndpointExtractor::extract_detailed(content);
        assert_eq!(extraction.strategy, Some(Strategy::EmbeddedData));
        assert!(keys(&extraction.endpoints).contains(&"10.1.1.1:8080".to_string()));
    }

    #[test]
    fn test_embedded_escaped_quotes() {
        let content = r#"{\"host\":\"10.1.1.3\",\"port\":3128}"#;
        assert_eq!(keys(&EndpointExtractor::extract(content)), vec!["10.1.1.3:3128"]);
    }

    #[test]
    fn test_embedded_loose_form() {
        let content = "host: 10.2.2.2, country: DE, port: 8000";
        assert_eq!(keys(&EndpointExtractor::extract(content)), vec!["10.2.2.2:8000"]);
    }

    #[test]
    fn test_embedded_json_lines() {
        let content = "{\"host\":\"10.3.3.1\",\"port\":80}\n{\"host\":\"10.3.3.2\",\"port\":81}\n";
        let endpoints = EndpointExtractor::extract(content);
        assert_eq!(keys(&endpoints), vec!["10.3.3.1:80", "10.3.3.2:81"]);
    }

    #[test]
    fn test_nothing_found() {
        let extraction = EndpointExtractor::extract_detailed("<html><p>no proxies today</p></html>");
        assert!(extraction.endpoints.is_empty());
        assert!(extraction.strategy.is_none());
    }
}
