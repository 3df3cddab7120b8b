use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_harvester::{
    config::{HarvestConfig, DEFAULT_CONFIG_LOCATIONS},
    proxy::{
        harvest, Endpoint, EndpointExtractor, HarvestReport, HistoryParser, HttpFetcher,
        ProxyChecker, ResultStore, VerifyEvent,
    },
    tui::{finish_behind_view, ProgressApp},
};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Scrape open proxy listings and verify what actually works
#[derive(Parser)]
#[command(name = "proxy-harvester")]
#[command(about = "Scrape open proxy listings and verify HTTP, HTTPS and SOCKS5 support")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Sources file (defaults to ./config/proxy-sources.toml or ../config/proxy-sources.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape all configured platforms, verify and save (default)
    Run {
        /// Output file for verified proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use a full GET with one retry as the liveness check
        #[arg(long)]
        strict: bool,
        /// Show a live progress view
        #[arg(long)]
        tui: bool,
        /// Do not merge results from earlier runs
        #[arg(long)]
        no_history: bool,
    },
    /// Extract candidate endpoints from a saved page
    Extract {
        /// Page content (HTML, text or JSON)
        input: PathBuf,
    },
    /// Verify candidates listed in a file
    Verify {
        /// File with `ip:port` lines or JSON records
        input: PathBuf,
        /// Output file for verified proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use a full GET with one retry as the liveness check
        #[arg(long)]
        strict: bool,
        /// Show a live progress view
        #[arg(long)]
        tui: bool,
        /// Candidates per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            output,
            strict,
            tui,
            no_history,
        }) => run(cli.config.as_deref(), cli.debug, output, strict, tui, no_history).await,
        None => run(cli.config.as_deref(), cli.debug, None, false, false, false).await,
        Some(Commands::Extract { input }) => {
            init_logging(cli.debug, false);
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {:?}", input))?;
            let extraction = EndpointExtractor::extract_detailed(&content);

            match extraction.strategy {
                Some(strategy) => println!(
                    "Found {} endpoints in {:?} ({})",
                    extraction.endpoints.len(),
                    input,
                    strategy
                ),
                None => println!("No endpoints found in {:?}", input),
            }
            for endpoint in &extraction.endpoints {
                println!("{}", endpoint);
            }
            Ok(())
        }
        Some(Commands::Verify {
            input,
            output,
            strict,
            tui,
            batch_size,
        }) => {
            let mut config = match cli.config.as_deref() {
                Some(path) => HarvestConfig::load(path)?,
                None => HarvestConfig::load_or_default(DEFAULT_CONFIG_LOCATIONS)?,
            };
            init_logging(cli.debug || config.pool.debug, tui);

            if strict {
                config.verify.strict_http = true;
            }
            if let Some(batch_size) = batch_size {
                config.verify.batch_size = batch_size;
            }
            let output = output.unwrap_or_else(|| config.verify.output.clone());
            let store = ResultStore::without_history(&output);

            let candidates = HistoryParser::parse_file(&input)
                .with_context(|| format!("failed to read {:?}", input))?;
            println!("Loaded {} candidates from {:?}", candidates.len(), input);

            let report = verify(config, store, candidates, tui).await?;
            print_summary(&report, &output);
            Ok(())
        }
    }
}

async fn run(
    config_path: Option<&Path>,
    debug: bool,
    output: Option<PathBuf>,
    strict: bool,
    tui: bool,
    no_history: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::load_default()?,
    };
    init_logging(debug || config.pool.debug, tui);

    if strict {
        config.verify.strict_http = true;
    }
    let output = output.unwrap_or_else(|| config.verify.output.clone());
    let store = if no_history {
        ResultStore::without_history(&output)
    } else {
        ResultStore::discover(&output)
    };

    let fetcher = HttpFetcher::new()?;
    let candidates = harvest::gather_candidates(&fetcher, &config, &store).await;

    let report = verify(config, store, candidates, tui).await?;
    print_summary(&report, &output);
    Ok(())
}

/// Verify and persist, optionally behind the progress view
async fn verify(
    config: HarvestConfig,
    store: ResultStore,
    candidates: Vec<Endpoint>,
    tui: bool,
) -> Result<HarvestReport> {
    let checker = ProxyChecker::with_config(config.verify.checker_config());

    if !tui {
        return harvest::verify_and_store(checker, &config, &store, candidates, None).await;
    }

    let (tx, rx) = mpsc::unbounded_channel::<VerifyEvent>();
    let task = tokio::spawn(async move {
        harvest::verify_and_store(checker, &config, &store, candidates, Some(tx)).await
    });

    let mut app = ProgressApp::new(rx);
    let view = app.run().await;

    if !task.is_finished() {
        println!("Progress view closed, waiting for verification to finish...");
    }
    finish_behind_view(task, view).await
}

fn print_summary(report: &HarvestReport, output: &Path) {
    let stats = &report.stats;
    println!(
        "Results: {} valid of {} tested ({:.1}%)",
        stats.valid,
        stats.total,
        stats.success_rate()
    );
    println!(
        "  http: {}, https: {}, socks5: {}",
        stats.http_ok, stats.https_ok, stats.socks5_ok
    );
    println!("Saved {} records to {:?}", report.records.len(), output);
}

fn init_logging(debug: bool, quiet: bool) {
    let directive = if debug {
        "proxy_harvester=debug"
    } else {
        "proxy_harvester=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    // the progress view owns the terminal
    if quiet {
        subscriber.with_writer(io::sink).init();
    } else {
        subscriber.init();
    }
}
