//! Aggregation of verification outcomes

use crate::proxy::models::{Endpoint, ProbeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Run-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Candidates submitted for verification
    pub total: usize,
    pub http_ok: usize,
    pub https_ok: usize,
    pub socks5_ok: usize,
    /// Records produced
    pub valid: usize,
}

impl RunStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Share of candidates that produced a record, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64 * 100.0
        }
    }
}

/// Everything a verification run produced
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub records: Vec<ProbeRecord>,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HarvestReport {
    pub fn new(records: Vec<ProbeRecord>, stats: RunStats, started_at: DateTime<Utc>) -> Self {
        Self {
            records,
            stats,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Report for a run that had nothing to verify
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            records: Vec::new(),
            stats: RunStats::default(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// One serialized record per line, ready for the writer
    pub fn json_lines(&self) -> Vec<String> {
        let lines: Vec<String> = self
            .records
            .iter()
            .filter_map(|record| serde_json::to_string(record).ok())
            .collect();
        if lines.len() < self.records.len() {
            warn!(
                "{}/{} records failed to serialize",
                self.records.len() - lines.len(),
                self.records.len()
            );
        }
        lines
    }

    /// Log the end-of-run summary
    pub fn log_summary(&self) {
        let stats = &self.stats;
        if stats.valid > 0 {
            info!(
                "verification finished: {} tested, {} valid ({:.1}%) in {}s",
                stats.total,
                stats.valid,
                stats.success_rate(),
                self.elapsed().num_seconds()
            );
            info!(
                "protocol breakdown: http {}, https {}, socks5 {}",
                stats.http_ok, stats.https_ok, stats.socks5_ok
            );
        } else {
            warn!("verification finished: {} tested, no working proxy found", stats.total);
        }
    }
}

/// Remove repeated endpoints, keeping the first occurrence
pub fn dedup_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = HashSet::with_capacity(endpoints.len());
    endpoints
        .into_iter()
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Anonymity;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let endpoints = vec![
            Endpoint::new("1.1.1.1", 80),
            Endpoint::new("2.2.2.2", 80),
            Endpoint::new("1.1.1.1", 80),
            Endpoint::new("1.1.1.1", 81),
        ];
        let unique = dedup_endpoints(endpoints);
        let keys: Vec<String> = unique.iter().map(|e| e.to_string()).collect();
        assert_eq!(keys, vec!["1.1.1.1:80", "2.2.2.2:80", "1.1.1.1:81"]);
    }

    #[test]
    fn test_success_rate() {
        let mut stats = RunStats::new(4);
        assert_eq!(stats.success_rate(), 0.0);
        stats.valid = 1;
        assert_eq!(stats.success_rate(), 25.0);
        assert_eq!(RunStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_json_lines() {
        let records = vec![
            ProbeRecord::live(Endpoint::new("1.2.3.4", 80), false, false, Anonymity::High),
            ProbeRecord::live(Endpoint::new("5.6.7.8", 1080), true, true, Anonymity::Unknown),
        ];
        let report = HarvestReport::new(records, RunStats::new(2), Utc::now());
        let lines = report.json_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"ip":"1.2.3.4:80""#));
        assert!(lines[1].ends_with(r#""anonymity":"unknown"}"#));
    }

    #[test]
    fn test_empty_report() {
        let report = HarvestReport::empty();
        assert!(report.records.is_empty());
        assert_eq!(report.stats, RunStats::default());
        assert!(report.json_lines().is_empty());
    }
}
