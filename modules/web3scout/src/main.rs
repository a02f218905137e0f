use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use web3scout::collectors::build_collectors;
use web3scout::enrichment::{EnrichmentOptions, EnrichmentPipeline};
use web3scout::fetch::{GoogleHtmlSearcher, HttpFetcher, PageFetcher, SerperSearcher, WebSearcher};
use web3scout::health::{FinderSetup, HealthCheck};
use web3scout::orchestrator::{Orchestrator, OrchestratorOptions};
use web3scout::sink::JsonlSink;
use web3scout::traits::{EmailFinder, ProjectSink};
use web3scout::{Aggregator, CancelFlag};
use web3scout_common::config::EmailService;
use web3scout_common::Config;

#[derive(Parser)]
#[command(name = "web3scout", about = "Web3 project discovery and contact enrichment")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true, default_value = "./config/web3scout.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect, dedup, enrich and store new projects
    Run {
        /// Repeat the run every N hours until interrupted
        #[arg(long)]
        interval_hours: Option<f64>,
    },
    /// Collect and dedup only; print new rows as JSON lines
    Collect,
    /// Show configuration and stored row count
    Status,
    /// Check config, storage, email finder and search; print pass/fail for each
    Check,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("web3scout=info".parse()?)
        .add_directive("web3scout_common=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("Loading config from {}", cli.config.display()))?;
    config.log_redacted();

    match cli.command {
        Command::Run { interval_hours } => run(&config, interval_hours).await,
        Command::Collect => collect(&config).await,
        Command::Status => status(&config).await,
        Command::Check => check(&config).await,
    }
}

fn interval_from_hours(hours: f64) -> Result<Duration> {
    if !(hours > 0.0) {
        bail!("--interval-hours must be positive, got {hours}");
    }
    Duration::try_from_secs_f64(hours * 3600.0)
        .with_context(|| format!("--interval-hours {hours} is out of range"))
}

async fn run(config: &Config, interval_hours: Option<f64>) -> Result<()> {
    let interval = interval_hours.map(interval_from_hours).transpose()?;
    config.validate_credentials()?;

    let cancel = CancelFlag::new();
    spawn_ctrl_c(cancel.clone());
    let aggregator = build_aggregator(config)?.with_cancel_flag(cancel.clone());

    let Some(interval) = interval else {
        let result = aggregator.run().await;
        if result.is_failed() {
            bail!("run {} {}", result.run_id, result.status);
        }
        return Ok(());
    };

    info!(interval_secs = interval.as_secs(), "Interval mode");
    loop {
        let result = aggregator.run().await;
        if result.is_failed() {
            warn!(run_id = %result.run_id, status = %result.status, "Run failed, waiting for next interval");
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
    }
    info!("Interval mode stopped");
    Ok(())
}

async fn collect(config: &Config) -> Result<()> {
    config.validate_credentials()?;
    let cancel = CancelFlag::new();
    spawn_ctrl_c(cancel.clone());
    let aggregator = build_aggregator(config)?.with_cancel_flag(cancel);

    let preview = aggregator.collect_only().await?;
    for record in &preview.records {
        println!("{}", serde_json::to_string(&record.to_row())?);
    }
    info!(
        discovered = preview.result.discovered,
        unique_new = preview.result.unique_new,
        duplicates = preview.result.duplicates_suppressed,
        "Collect-only pass complete"
    );
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let sink = JsonlSink::new(&config.file.storage.path);
    let stored = sink.count().await?;

    println!("Storage:     {} ({stored} rows)", sink.path().display());
    println!("Email:       {:?}", config.file.enrichment.email_service);
    println!(
        "Search:      {}",
        if config.secrets.serper_api_key.is_some() { "serper" } else { "google html" }
    );
    println!("Collectors:");
    for c in config.enabled_collectors() {
        println!("  {:<20} {}", c.name, c.url);
    }
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let file = &config.file;
    let fetcher: Arc<dyn PageFetcher> =
        Arc::new(HttpFetcher::new(Duration::from_secs(file.http.request_timeout_secs))?);
    let finder = match build_finder(config) {
        Ok(Some(finder)) => FinderSetup::Ready(finder),
        Ok(None) => FinderSetup::Disabled,
        Err(e) => FinderSetup::Unavailable(format!("{e:#}")),
    };

    let health = HealthCheck::new(
        Arc::new(JsonlSink::new(&file.storage.path)),
        finder,
        build_searcher(config, fetcher)?,
        Duration::from_secs(file.enrichment.call_timeout_secs),
    );

    let checks = health.run(config).await;
    for c in &checks {
        println!("{c}");
    }
    let failed = checks.iter().filter(|c| !c.passed).count();
    if failed > 0 {
        bail!("{failed} of {} component checks failed", checks.len());
    }
    Ok(())
}

fn spawn_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });
}

fn build_aggregator(config: &Config) -> Result<Aggregator> {
    let file = &config.file;
    let http_timeout = Duration::from_secs(file.http.request_timeout_secs);

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(http_timeout)?);

    let searcher = build_searcher(config, fetcher.clone())?;
    let finder = build_finder(config)?;

    let mut orchestrator = Orchestrator::new(OrchestratorOptions::from_config(file));
    for (collector, settings) in build_collectors(file, fetcher.clone()) {
        orchestrator.add(collector, settings);
    }
    if orchestrator.is_empty() {
        warn!("No enabled collectors configured");
    }

    let enrichment = EnrichmentPipeline::new(
        &EnrichmentOptions::from_config(file),
        finder,
        fetcher,
        Some(searcher),
    );
    let sink: Arc<dyn ProjectSink> = Arc::new(JsonlSink::new(&file.storage.path));

    Ok(Aggregator::new(
        orchestrator,
        enrichment,
        sink,
        file.retry.to_policy(),
    ))
}

fn build_searcher(config: &Config, fetcher: Arc<dyn PageFetcher>) -> Result<Arc<dyn WebSearcher>> {
    let timeout = Duration::from_secs(config.file.http.request_timeout_secs);
    let searcher: Arc<dyn WebSearcher> = match &config.secrets.serper_api_key {
        Some(key) => Arc::new(SerperSearcher::new(key, timeout)?),
        None => Arc::new(GoogleHtmlSearcher::new(fetcher)),
    };
    Ok(searcher)
}

fn build_finder(config: &Config) -> Result<Option<Arc<dyn EmailFinder>>> {
    let finder: Arc<dyn EmailFinder> = match config.file.enrichment.email_service {
        EmailService::Hunter => {
            let key = config
                .secrets
                .hunter_api_key
                .clone()
                .context("HUNTER_IO_API_KEY is not set")?;
            Arc::new(hunter_client::HunterClient::new(key)?)
        }
        EmailService::Snov => {
            let token = config
                .secrets
                .snov_api_key
                .as_deref()
                .context("SNOV_IO_API_KEY is not set")?;
            Arc::new(snov_client::SnovClient::new(token)?)
        }
        EmailService::None => return Ok(None),
    };
    Ok(Some(finder))
}
