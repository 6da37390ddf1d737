//! Harvester CLI
//!
//! Local execution entry point for live crawls and checkpoint repair.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use harvester::{
    error::Result,
    models::{Config, RunSummary, Scope, ScopeKind, Source, regions::region_of},
    pipeline::{self, Orchestrator, RegionIterator, ScopeOptions, StopSignal},
    services::{ApiSink, SiteExtractor},
    storage::{FileCheckpointStore, Generation},
    utils::http::HttpFetcher,
};

/// Resumable live crawler for real-estate listing portals
#[derive(Parser, Debug)]
#[command(name = "harvester", version, about = "Resumable live listing crawler")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a single scope (a city by default)
    Live {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Crawl every voivodeship in turn, resuming from checkpoints
    LiveAll {
        /// Source portal
        #[arg(long)]
        source: Option<Source>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Crawl every city of every voivodeship in turn, resuming from checkpoints
    LiveAllCities {
        /// Source portal
        #[arg(long)]
        source: Option<Source>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Rebuild a scope's checkpoint from a captured run log
    SyncDoneFromLog {
        /// Run log to scan for delivery events
        log_path: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Recency window the checkpoint belongs to (0 = full scan)
        #[arg(long, default_value_t = 0)]
        last_days: u32,
    },

    /// Validate the configuration file
    Validate,
}

/// Which scope to work on.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Source portal
    #[arg(long)]
    source: Option<Source>,

    /// City name (defaults to `defaults.city`)
    #[arg(long, conflicts_with_all = ["region", "country"])]
    city: Option<String>,

    /// Voivodeship name
    #[arg(long, conflicts_with = "country")]
    region: Option<String>,

    /// Whole country
    #[arg(long)]
    country: bool,
}

/// Limits and retry policy shared by the live commands.
#[derive(Args, Debug)]
struct RunArgs {
    /// Stop after this many listing pages per scope
    #[arg(long)]
    max_pages: Option<u32>,

    /// Accept only listings observed within the last N days (0 = no filter)
    #[arg(long, default_value_t = 0)]
    last_days: u32,

    /// Stop after this many new items per scope
    #[arg(long)]
    limit: Option<usize>,

    /// Retry rounds for transient failures (defaults to `run.retry_rounds`)
    #[arg(long)]
    retry_rounds: Option<u32>,

    /// Seconds between retry rounds (defaults to `run.retry_sleep_secs`)
    #[arg(long)]
    retry_sleep_s: Option<u64>,
}

impl TargetArgs {
    fn scope(&self, config: &Config, recency_window_days: u32) -> Scope {
        let source = self.source.unwrap_or(config.defaults.source);
        if self.country {
            return Scope::country(source, recency_window_days);
        }
        if let Some(region) = &self.region {
            return Scope::region(source, region, recency_window_days);
        }

        let city = self.city.as_deref().unwrap_or(&config.defaults.city);
        let region = region_of(city).map(|v| v.name);
        Scope::city(source, city, region, recency_window_days)
    }
}

impl RunArgs {
    fn options(&self, config: &Config) -> ScopeOptions {
        let mut options = ScopeOptions::from_config(config);
        options.max_pages = self.max_pages;
        options.limit = self.limit;
        if let Some(rounds) = self.retry_rounds {
            options.retry_rounds = rounds;
        }
        if let Some(secs) = self.retry_sleep_s {
            options.retry_sleep = Duration::from_secs(secs);
        }
        options
    }
}

/// Initialize logging; `RUST_LOG` wins over `--verbose` and `logging.level`.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    config.apply_env();
    init_logging(cli.verbose, &config.logging.level);

    match loaded {
        Ok(_) => log::info!("Loaded configuration from {}", cli.config.display()),
        Err(e) => log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        ),
    }

    match run(cli.command, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> Result<u8> {
    config.validate()?;

    match command {
        Command::Live { target, run } => {
            let scope = target.scope(&config, run.last_days);
            let scopes = RegionIterator::single(scope.clone())?;
            let summary = crawl(&config, scope.source, run.options(&config), scopes).await?;
            Ok(exit_status(&config, &summary))
        }

        Command::LiveAll { source, run } => {
            let source = source.unwrap_or(config.defaults.source);
            let scopes = RegionIterator::new(source, ScopeKind::Region, run.last_days)?;
            let summary = crawl(&config, source, run.options(&config), scopes).await?;
            Ok(exit_status(&config, &summary))
        }

        Command::LiveAllCities { source, run } => {
            let source = source.unwrap_or(config.defaults.source);
            let scopes = RegionIterator::new(source, ScopeKind::City, run.last_days)?;
            let summary = crawl(&config, source, run.options(&config), scopes).await?;
            Ok(exit_status(&config, &summary))
        }

        Command::SyncDoneFromLog {
            log_path,
            target,
            last_days,
        } => {
            let scope = target.scope(&config, last_days);
            let generation = Generation::for_scope(&scope);
            let store = FileCheckpointStore::new(&config.paths.checkpoint_dir);
            log::info!(
                "Syncing {} into {}",
                log_path.display(),
                store.path_for(&generation).display()
            );

            let added = pipeline::sync_done_from_log(&store, &generation, &log_path).await?;
            log::info!("Added {} items to {}", added, generation.file_name());
            Ok(0)
        }

        Command::Validate => {
            log::info!("Configuration OK");
            log::info!("Checkpoints: {}", config.paths.checkpoint_dir.display());
            log::info!(
                "Delivery: backend {}, queue {}",
                if config.backend.enabled { "on" } else { "off" },
                if config.queue.enabled { "on" } else { "off" }
            );
            Ok(0)
        }
    }
}

/// Wire the real collaborators and drive the scopes.
async fn crawl(
    config: &Config,
    source: Source,
    options: ScopeOptions,
    scopes: RegionIterator,
) -> Result<RunSummary> {
    let fetcher = Arc::new(HttpFetcher::new(&config.http)?);
    let extractor = SiteExtractor::new(
        source,
        fetcher,
        &config.defaults.deal,
        &config.defaults.kind,
    )?;
    let sink = ApiSink::from_config(config)?;
    let store = FileCheckpointStore::new(&config.paths.checkpoint_dir)
        .with_flush_every(config.run.checkpoint_flush_every);

    let stop = StopSignal::new();
    stop.install_ctrl_c();

    let orchestrator = Orchestrator::new(&extractor, &sink, &store, options).with_stop(stop);
    pipeline::run_live(&orchestrator, scopes).await
}

fn exit_status(config: &Config, summary: &RunSummary) -> u8 {
    let code = summary.exit_code(config.run.max_permanent_failures);
    if code != 0 {
        log::error!(
            "Run finished with {} permanent failures (threshold {}) and {} aborted scopes",
            summary.totals.permanent_failures,
            config.run.max_permanent_failures,
            summary.aborted.len()
        );
    }
    if code == 0 { 0 } else { 1 }
}

