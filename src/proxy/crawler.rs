//! Fetching listing pages and turning them into candidates

use crate::config::PlatformConfig;
use crate::proxy::extractor::EndpointExtractor;
use crate::proxy::models::Endpoint;
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{error, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Anything that can return the raw body of a listing page
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, method: &str) -> Result<String>;
}

/// Configuration for the page fetcher
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Page fetcher backed by `reqwest`
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str, method: &str) -> Result<String> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method {:?}", method))?;
        let response = self.client.request(method, url).send().await?;
        Ok(response.text().await?)
    }
}

/// Outcome of crawling one page
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub platform: String,
    pub url: String,
    pub endpoints: Vec<Endpoint>,
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn success(platform: &str, url: &str, endpoints: Vec<Endpoint>) -> Self {
        Self {
            platform: platform.to_string(),
            url: url.to_string(),
            endpoints,
            error: None,
        }
    }

    pub fn failure(platform: &str, url: &str, error: String) -> Self {
        Self {
            platform: platform.to_string(),
            url: url.to_string(),
            endpoints: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetch one page and extract its candidates
pub async fn crawl_page<S: PageSource + ?Sized>(
    source: &S,
    platform: &PlatformConfig,
    url: &str,
) -> CrawlResult {
    match source.fetch(url, &platform.method).await {
        Ok(content) => {
            let extraction = EndpointExtractor::extract_detailed(&content);
            match extraction.strategy {
                Some(strategy) => info!(
                    "parsed {} endpoints from {} via {}",
                    extraction.endpoints.len(),
                    url,
                    strategy
                ),
                None => warn!("no usable endpoint found at {}", url),
            }
            CrawlResult::success(&platform.name, url, extraction.endpoints)
        }
        Err(e) => {
            error!("request to {} failed: {:#}", url, e);
            CrawlResult::failure(&platform.name, url, e.to_string())
        }
    }
}

/// Crawl every platform in turn. Pages of one platform are fetched
/// concurrently; results keep configuration order.
pub async fn crawl_platforms<S: PageSource + ?Sized>(
    source: &S,
    platforms: &[PlatformConfig],
) -> Vec<CrawlResult> {
    let mut results = Vec::new();
    for platform in platforms {
        let pages = platform
            .urls
            .iter()
            .map(|url| crawl_page(source, platform, url));
        results.extend(join_all(pages).await);
    }
    results
}

/// Candidates from every platform, in crawl order and possibly repeated
pub async fn collect_candidates<S: PageSource + ?Sized>(
    source: &S,
    platforms: &[PlatformConfig],
) -> Vec<Endpoint> {
    let endpoints: Vec<Endpoint> = crawl_platforms(source, platforms)
        .await
        .into_iter()
        .flat_map(|result| result.endpoints)
        .collect();
    info!("collected {} candidate endpoints in total", endpoints.len());
    endpoints
}
