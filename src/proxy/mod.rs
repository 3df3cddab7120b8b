//! Proxy discovery and verification
//!
//! This module provides functionality for:
//! - Extracting candidate endpoints from listing pages in various shapes
//! - Probing candidates for HTTP, HTTPS tunnel and SOCKS5 support and anonymity
//! - Verifying candidate lists with bounded concurrency in sequential batches
//! - Reading earlier results and persisting verified records

pub mod checker;
pub mod crawler;
pub mod extractor;
pub mod harvest;
pub mod models;
pub mod parser;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod store;

pub use checker::{CheckerConfig, Prober, ProxyChecker};
pub use crawler::{CrawlResult, CrawlerConfig, HttpFetcher, PageSource};
pub use extractor::{EndpointExtractor, Extraction, Strategy};
pub use models::{Anonymity, Endpoint, ProbeRecord};
pub use parser::HistoryParser;
pub use report::{dedup_endpoints, HarvestReport, RunStats};
pub use scheduler::{concurrency_budget, SchedulerConfig, Verifier, VerifyEvent};
pub use store::ResultStore;
