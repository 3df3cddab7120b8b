//! Bounded-concurrency verification of candidate endpoints
//!
//! Candidates are split into fixed-size batches that run one after another.
//! Inside a batch, a counting semaphore admits at most the concurrency budget
//! worth of tasks; the batch ends once every admitted task has been joined.
//! Each task gates on the liveness probe and then fans out the three
//! capability probes concurrently.

use crate::proxy::checker::Prober;
use crate::proxy::models::{Endpoint, ProbeRecord};
use crate::proxy::report::{HarvestReport, RunStats};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Candidates per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Hard ceiling on concurrent candidate tasks
pub const DEFAULT_MAX_WORKERS: usize = 80;

/// Concurrent tasks per available core
const WORKERS_PER_CORE: usize = 4;

/// Worker ceiling for one run: `min(parallelism * 4, candidates, cap)`
pub fn concurrency_budget(parallelism: usize, candidates: usize, cap: usize) -> usize {
    parallelism
        .saturating_mul(WORKERS_PER_CORE)
        .min(candidates)
        .min(cap)
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for the verification scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    /// Overrides the detected core count when computing the budget
    pub parallelism: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            parallelism: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }
}

/// Progress notifications emitted during a run
#[derive(Debug, Clone)]
pub enum VerifyEvent {
    Started {
        total: usize,
        workers: usize,
        batches: usize,
    },
    BatchStarted {
        index: usize,
        batches: usize,
        size: usize,
    },
    Checked {
        done: usize,
        total: usize,
    },
    Verified(ProbeRecord),
    Finished(RunStats),
}

/// State shared by every task of a run.
///
/// Records and counters sit behind separate locks.
struct Shared {
    records: Mutex<Vec<ProbeRecord>>,
    stats: Mutex<RunStats>,
    progress: AtomicUsize,
    total: usize,
    events: Option<UnboundedSender<VerifyEvent>>,
}

impl Shared {
    fn emit(&self, event: VerifyEvent) {
        if let Some(tx) = &self.events {
            // the receiver may have gone away; the run carries on regardless
            let _ = tx.send(event);
        }
    }

    fn task_done(&self) {
        let done = self.progress.fetch_add(1, Ordering::SeqCst) + 1;
        if done == 1 || done % 10 == 0 || done == self.total {
            info!(
                "verification progress: {}/{} ({:.1}%)",
                done,
                self.total,
                done as f64 / self.total as f64 * 100.0
            );
        }
        self.emit(VerifyEvent::Checked {
            done,
            total: self.total,
        });
    }
}

/// Drives a [`Prober`] over a candidate list
pub struct Verifier<P: Prober> {
    prober: Arc<P>,
    config: SchedulerConfig,
    events: Option<UnboundedSender<VerifyEvent>>,
}

impl<P: Prober> Verifier<P> {
    pub fn new(prober: P) -> Self {
        Self::with_config(prober, SchedulerConfig::default())
    }

    pub fn with_config(prober: P, config: SchedulerConfig) -> Self {
        Self {
            prober: Arc::new(prober),
            config,
            events: None,
        }
    }

    /// Send progress notifications to `tx`
    pub fn with_events(mut self, tx: UnboundedSender<VerifyEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Verify deduplicated candidates.
    ///
    /// Records come back in completion order, not input order.
    pub async fn verify(&self, candidates: Vec<Endpoint>) -> HarvestReport {
        let started_at = Utc::now();
        let total = candidates.len();

        if total == 0 {
            warn!("no candidates to verify");
            if let Some(tx) = &self.events {
                let _ = tx.send(VerifyEvent::Finished(RunStats::default()));
            }
            return HarvestReport::empty();
        }

        let parallelism = self.config.parallelism.unwrap_or_else(available_parallelism);
        let workers = concurrency_budget(parallelism, total, self.config.max_workers).max(1);
        let batch_size = self.config.batch_size.max(1);
        let batches = total.div_ceil(batch_size);

        info!(
            "verifying {} candidates with {} workers (cores: {}) in {} batches of up to {}",
            total, workers, parallelism, batches, batch_size
        );

        let shared = Arc::new(Shared {
            records: Mutex::new(Vec::with_capacity(total / 3)),
            stats: Mutex::new(RunStats::new(total)),
            progress: AtomicUsize::new(0),
            total,
            events: self.events.clone(),
        });
        shared.emit(VerifyEvent::Started {
            total,
            workers,
            batches,
        });

        let semaphore = Arc::new(Semaphore::new(workers));

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            info!("starting batch {}/{} ({} candidates)", index + 1, batches, batch.len());
            shared.emit(VerifyEvent::BatchStarted {
                index,
                batches,
                size: batch.len(),
            });

            let mut tasks = JoinSet::new();
            for endpoint in batch {
                // blocks until a worker slot frees up
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!("admission gate closed: {}", e);
                        break;
                    }
                };
                let prober = Arc::clone(&self.prober);
                let shared = Arc::clone(&shared);
                let endpoint = endpoint.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    check_candidate(prober.as_ref(), &shared, endpoint).await;
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("verification task failed: {}", e);
                }
            }
            info!("batch {}/{} complete", index + 1, batches);
        }

        let records = std::mem::take(&mut *shared.records.lock().await);
        let stats = *shared.stats.lock().await;
        shared.emit(VerifyEvent::Finished(stats));

        let report = HarvestReport::new(records, stats, started_at);
        report.log_summary();
        report
    }
}

async fn check_candidate<P: Prober>(prober: &P, shared: &Shared, endpoint: Endpoint) {
    if prober.liveness(&endpoint).await {
        shared.stats.lock().await.http_ok += 1;

        let (https, socks5, anonymity) = tokio::join!(
            prober.https(&endpoint),
            prober.socks5(&endpoint),
            prober.anonymity(&endpoint),
        );

        {
            let mut stats = shared.stats.lock().await;
            if https {
                stats.https_ok += 1;
            }
            if socks5 {
                stats.socks5_ok += 1;
            }
            stats.valid += 1;
        }

        let record = ProbeRecord::live(endpoint, https, socks5, anonymity);
        debug!("verified {} [{}] {}", record.endpoint, record.protocols(), record.anonymity);
        shared.emit(VerifyEvent::Verified(record.clone()));
        shared.records.lock().await.push(record);
    }

    shared.task_done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Anonymity;
    use crate::proxy::report::dedup_endpoints;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Prober whose outcomes are derived from the port number
    #[derive(Default)]
    struct FakeProber {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
        batch_size: usize,
        batch_violations: AtomicUsize,
    }

    impl FakeProber {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn liveness(&self, endpoint: &Endpoint) -> bool {
            if self.batch_size > 0 {
                let index = endpoint.port as usize - 1;
                let earlier_batches = index / self.batch_size * self.batch_size;
                if self.finished.load(Ordering::SeqCst) < earlier_batches {
                    self.batch_violations.fetch_add(1, Ordering::SeqCst);
                }
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let live = endpoint.port % 2 == 0 || self.batch_size > 0;
            if !live {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            live
        }

        async fn https(&self, endpoint: &Endpoint) -> bool {
            endpoint.port % 4 == 0
        }

        async fn socks5(&self, endpoint: &Endpoint) -> bool {
            endpoint.port % 6 == 0
        }

        async fn anonymity(&self, _endpoint: &Endpoint) -> Anonymity {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Anonymity::High
        }
    }

    fn candidates(count: u16) -> Vec<Endpoint> {
        (1..=count).map(|port| Endpoint::new("10.0.0.1", port)).collect()
    }

    #[test]
    fn test_concurrency_budget() {
        assert_eq!(concurrency_budget(2, 1000, 80), 8);
        assert_eq!(concurrency_budget(2, 3, 80), 3);
        assert_eq!(concurrency_budget(64, 1000, 80), 80);
        assert_eq!(concurrency_budget(1, 0, 80), 0);
        assert_eq!(concurrency_budget(usize::MAX, 10, 80), 10);
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::new()
            .with_batch_size(10)
            .with_max_workers(5)
            .with_parallelism(3);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.parallelism, Some(3));
        assert_eq!(SchedulerConfig::default().batch_size, DEFAULT_BATCH_SIZE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_budget() {
        let prober = FakeProber::with_delay(Duration::from_millis(5));
        let config = SchedulerConfig::new().with_batch_size(50).with_parallelism(2);
        let verifier = Verifier::with_config(prober, config);

        verifier.verify(candidates(200)).await;

        let peak = verifier.prober.peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= 8, "peak {} exceeded budget 8", peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_budget_bounded_by_candidate_count() {
        let prober = FakeProber::with_delay(Duration::from_millis(5));
        let config = SchedulerConfig::new().with_parallelism(16);
        let verifier = Verifier::with_config(prober, config);

        verifier.verify(candidates(3)).await;

        assert!(verifier.prober.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_record_per_live_candidate() {
        let verifier = Verifier::with_config(
            FakeProber::default(),
            SchedulerConfig::new().with_batch_size(7).with_parallelism(2),
        );

        let report = verifier.verify(candidates(30)).await;

        assert_eq!(report.records.len(), 15);
        let keys: HashSet<String> = report.records.iter().map(|r| r.endpoint.to_string()).collect();
        assert_eq!(keys.len(), 15);
        assert!(report.records.iter().all(|r| r.endpoint.port % 2 == 0 && r.http));

        assert_eq!(report.stats.total, 30);
        assert_eq!(report.stats.http_ok, 15);
        assert_eq!(report.stats.valid, 15);
        assert_eq!(report.stats.https_ok, 7);
        assert_eq!(report.stats.socks5_ok, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batches_run_sequentially() {
        let prober = FakeProber {
            delay: Duration::from_millis(2),
            batch_size: 10,
            ..Default::default()
        };
        let verifier = Verifier::with_config(
            prober,
            SchedulerConfig::new().with_batch_size(10).with_parallelism(8),
        );

        let report = verifier.verify(candidates(45)).await;

        assert_eq!(report.records.len(), 45);
        assert_eq!(verifier.prober.batch_violations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_candidate_verified_once() {
        let mut list = candidates(4);
        list.insert(0, Endpoint::new("10.0.0.1", 2));
        list.push(Endpoint::new("10.0.0.1", 2));

        let verifier = Verifier::new(FakeProber::default());
        let report = verifier.verify(dedup_endpoints(list)).await;

        let hits = report
            .records
            .iter()
            .filter(|r| r.endpoint == Endpoint::new("10.0.0.1", 2))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(report.stats.total, 4);
    }

    #[tokio::test]
    async fn test_events_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let verifier = Verifier::new(FakeProber::default()).with_events(tx);

        verifier.verify(candidates(12)).await;
        drop(verifier);

        let mut checked = 0;
        let mut verified = 0;
        let mut finished = None;
        while let Some(event) = rx.recv().await {
            match event {
                VerifyEvent::Checked { .. } => checked += 1,
                VerifyEvent::Verified(_) => verified += 1,
                VerifyEvent::Finished(stats) => finished = Some(stats),
                _ => {}
            }
        }
        assert_eq!(checked, 12);
        assert_eq!(verified, 6);
        assert_eq!(finished.map(|s| s.valid), Some(6));
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let verifier = Verifier::new(FakeProber::default());
        let report = verifier.verify(Vec::new()).await;
        assert!(report.records.is_empty());
        assert_eq!(report.stats.total, 0);
    }
}
