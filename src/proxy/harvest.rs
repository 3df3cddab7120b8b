//! End-to-end harvest: scrape, merge history, verify, persist

use crate::config::HarvestConfig;
use crate::proxy::checker::Prober;
use crate::proxy::crawler::{collect_candidates, PageSource};
use crate::proxy::models::Endpoint;
use crate::proxy::report::{dedup_endpoints, HarvestReport};
use crate::proxy::scheduler::{Verifier, VerifyEvent};
use crate::proxy::store::ResultStore;
use crate::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Scrape every configured platform and merge in earlier results
pub async fn gather_candidates<S: PageSource + ?Sized>(
    source: &S,
    config: &HarvestConfig,
    store: &ResultStore,
) -> Vec<Endpoint> {
    info!(
        "scraping {} pages from {} platforms",
        config.url_count(),
        config.platforms.len()
    );
    let mut candidates = collect_candidates(source, &config.platforms).await;

    let previous = store.load_previous();
    if !previous.is_empty() {
        info!("merging {} previous candidates", previous.len());
        candidates.extend(previous);
    }

    let unique = dedup_endpoints(candidates);
    info!("{} unique candidates after deduplication", unique.len());
    unique
}

/// Verify candidates and persist the records.
///
/// Only a failure to write the output aborts.
pub async fn verify_and_store<P: Prober>(
    prober: P,
    config: &HarvestConfig,
    store: &ResultStore,
    candidates: Vec<Endpoint>,
    events: Option<UnboundedSender<VerifyEvent>>,
) -> Result<HarvestReport> {
    let mut verifier = Verifier::with_config(prober, config.verify.scheduler_config());
    if let Some(tx) = events {
        verifier = verifier.with_events(tx);
    }

    let report = verifier.verify(dedup_endpoints(candidates)).await;
    store.write(&report)?;
    Ok(report)
}

/// The full pipeline
pub async fn run<S, P>(
    source: &S,
    prober: P,
    config: &HarvestConfig,
    store: &ResultStore,
    events: Option<UnboundedSender<VerifyEvent>>,
) -> Result<HarvestReport>
where
    S: PageSource + ?Sized,
    P: Prober,
{
    let candidates = gather_candidates(source, config, store).await;
    verify_and_store(prober, config, store, candidates, events).await
}
