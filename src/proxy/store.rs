//! Line-oriented result store

use crate::proxy::models::Endpoint;
use crate::proxy::parser::HistoryParser;
use crate::proxy::report::HarvestReport;
use crate::Result;
use anyhow::Context;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Places an earlier run may have left its results, in lookup order
pub const HISTORY_LOCATIONS: &[&str] = &["ip.txt", "../ip.txt", "../../ip.txt", "/tmp/ip.txt"];

/// Reads earlier results and writes the new ones
#[derive(Debug, Clone)]
pub struct ResultStore {
    output: PathBuf,
    history: Option<PathBuf>,
}

impl ResultStore {
    /// Store writing to `output`, reading history from the same file
    pub fn new<P: Into<PathBuf>>(output: P) -> Self {
        let output = output.into();
        Self {
            history: Some(output.clone()),
            output,
        }
    }

    /// Store writing to `output`, reading history from the first existing
    /// well-known location
    pub fn discover<P: Into<PathBuf>>(output: P) -> Self {
        let history = HISTORY_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists());
        match &history {
            Some(path) => info!("found previous results at {}", path.display()),
            None => debug!("no previous result file found"),
        }
        Self {
            output: output.into(),
            history,
        }
    }

    /// Store that never reads history
    pub fn without_history<P: Into<PathBuf>>(output: P) -> Self {
        Self {
            output: output.into(),
            history: None,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Candidates recorded by earlier runs; unreadable files yield nothing
    pub fn load_previous(&self) -> Vec<Endpoint> {
        let Some(path) = &self.history else {
            return Vec::new();
        };
        if !path.exists() {
            info!("no previous results, using freshly scraped candidates only");
            return Vec::new();
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                let endpoints = HistoryParser::parse_string(&content);
                info!("loaded {} previous candidates from {}", endpoints.len(), path.display());
                endpoints
            }
            Err(e) => {
                warn!("failed to read previous results {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Truncate the output and write one JSON record per line
    pub fn write(&self, report: &HarvestReport) -> Result<usize> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.output)
            .with_context(|| format!("failed to create {}", self.output.display()))?;

        let mut writer = BufWriter::new(file);
        let lines = report.json_lines();
        for line in &lines {
            writeln!(writer, "{}", line)
                .with_context(|| format!("failed to write {}", self.output.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.output.display()))?;

        info!("wrote {} records to {}", lines.len(), self.output.display());
        Ok(lines.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Anonymity, ProbeRecord};
    use crate::proxy::report::RunStats;
    use chrono::Utc;

    fn report() -> HarvestReport {
        let records = vec![
            ProbeRecord::live(Endpoint::new("1.2.3.4", 80), true, false, Anonymity::Common),
            ProbeRecord::live(Endpoint::new("5.6.7.8", 1080), false, true, Anonymity::High),
        ];
        HarvestReport::new(records, RunStats::new(2), Utc::now())
    }

    #[test]
    fn test_write_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip.txt");
        fs::write(&path, "stale content that must disappear\n".repeat(10)).unwrap();

        let store = ResultStore::new(&path);
        assert_eq!(store.write(&report()).unwrap(), 2);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("stale"));

        let previous: Vec<String> = store.load_previous().iter().map(|e| e.to_string()).collect();
        assert_eq!(previous, vec!["1.2.3.4:80", "5.6.7.8:1080"]);
    }

    #[test]
    fn test_load_mixed_legacy_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip.txt");
        fs::write(
            &path,
            "9.9.9.9:3128\n{\"ip\":\"8.8.8.8\",\"port\":53}\n\"{\\\"ip\\\":\\\"7.7.7.7:80\\\"}\"\nnoise\n",
        )
        .unwrap();

        let previous = ResultStore::new(&path).load_previous();
        assert_eq!(previous.len(), 3);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("missing.txt"));
        assert!(store.load_previous().is_empty());

        let store = ResultStore::without_history(dir.path().join("out.txt"));
        assert!(store.load_previous().is_empty());
    }

    #[test]
    fn test_unwritable_destination_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("no-such-dir").join("ip.txt"));
        assert!(store.write(&report()).is_err());
    }
}
