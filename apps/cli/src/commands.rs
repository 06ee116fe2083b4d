//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use siteharvest_backend::BackendClient;
use siteharvest_core::Orchestrator;
use siteharvest_embedding::EmbeddingClient;
use siteharvest_shared::{
    CrawlRequest, CrawlerConfig, ProgressEvent, config_dir, init_config, load_config,
};
use siteharvest_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// siteharvest — turn a seed address into a harvested, searchable site.
#[derive(Parser)]
#[command(
    name = "siteharvest",
    version,
    about = "Crawl whole sites through a remote crawl backend and search the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a site (or a single page) and persist the results.
    Crawl {
        /// Seed address to start from.
        url: String,

        /// Crawl the seed page only, skipping discovery and batching.
        #[arg(long)]
        single: bool,

        /// Maximum pages for this run (overrides config).
        #[arg(long)]
        max_pages: Option<usize>,

        /// Batch size (overrides config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Traversal strategy: auto, native, or manual (overrides config).
        #[arg(long)]
        strategy: Option<String>,

        /// Database path (defaults to ~/.siteharvest/siteharvest.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Search harvested pages by semantic similarity (or text with --text).
    Search {
        /// Query text.
        query: String,

        /// Use full-text search instead of the embedding index.
        #[arg(long)]
        text: bool,

        /// Maximum results.
        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Database path (defaults to ~/.siteharvest/siteharvest.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Probe the crawl backend's liveness endpoint.
    Health,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a default config file.
    Init,
    /// Print the effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "siteharvest=info",
        1 => "siteharvest=debug",
        _ => "siteharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Crawl {
            url,
            single,
            max_pages,
            batch_size,
            strategy,
            db,
        } => crawl(url, single, max_pages, batch_size, strategy, db).await,
        Command::Search {
            query,
            text,
            limit,
            db,
        } => search(query, text, limit, db).await,
        Command::Health => health().await,
        Command::Config { action } => config_command(action),
    }
}

async fn crawl(
    url: String,
    single: bool,
    max_pages: Option<usize>,
    batch_size: Option<usize>,
    strategy: Option<String>,
    db: Option<PathBuf>,
) -> Result<()> {
    let seed = Url::parse(&url).map_err(|e| eyre!("invalid seed address {url}: {e}"))?;

    let app_config = load_config()?;
    let mut crawler_config = CrawlerConfig::from(&app_config);
    if let Some(n) = max_pages {
        crawler_config.max_pages = n;
    }
    if let Some(n) = batch_size {
        crawler_config.batch_size = n;
    }
    if let Some(tag) = strategy {
        crawler_config.strategy = tag;
    }

    let backend = BackendClient::new(&app_config.backend)?;
    let embedder = match EmbeddingClient::new(&app_config.embedding) {
        Ok(client) => Some(client),
        Err(e) => {
            info!(reason = %e, "embedding disabled");
            None
        }
    };
    let storage = Arc::new(Storage::open(&db_path(db)?).await?);

    let orchestrator = Orchestrator::new(backend, embedder, storage, crawler_config);
    let _progress = CliProgress::attach(&orchestrator);

    // Ctrl-C requests cooperative cancellation; in-flight work winds down.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let request = if single {
        CrawlRequest::single_page(seed)
    } else {
        CrawlRequest::smart_site(seed)
    };

    let summary = orchestrator.crawl(&request, &cancel).await?;

    println!(
        "\n{} — {}/{} pages crawled ({:.0}% success) in {:.1}s",
        summary.status,
        summary.completed,
        summary.total_pages,
        summary.success_rate * 100.0,
        summary.elapsed_ms as f64 / 1000.0,
    );
    if let (Some(first), Some(last)) = (&summary.first_address, &summary.last_address) {
        println!("  first: {first}\n  last:  {last}");
    }
    Ok(())
}

async fn search(query: String, text: bool, limit: usize, db: Option<PathBuf>) -> Result<()> {
    let app_config = load_config()?;
    let storage = Storage::open(&db_path(db)?).await?;

    if text {
        let records = storage.search_text(&query, limit).await?;
        print_results(records.iter().map(|r| (r, None)));
        return Ok(());
    }

    // Embed the query; fall back to textual search when no embedder is
    // configured.
    match EmbeddingClient::new(&app_config.embedding) {
        Ok(embedder) => {
            let vector = embedder.embed(&query).await?;
            let scored = storage.search_similar(&vector, limit).await?;
            print_results(scored.iter().map(|(r, score)| (r, Some(*score))));
        }
        Err(e) => {
            info!(reason = %e, "no embedder configured, falling back to text search");
            let records = storage.search_text(&query, limit).await?;
            print_results(records.iter().map(|r| (r, None)));
        }
    }
    Ok(())
}

fn print_results<'a>(
    results: impl Iterator<Item = (&'a siteharvest_shared::PageRecord, Option<f64>)>,
) {
    let mut any = false;
    for (record, score) in results {
        any = true;
        let title = record.metadata.title.as_deref().unwrap_or("(untitled)");
        match score {
            Some(score) => println!("{score:.3}  {title}\n       {}", record.address),
            None => println!("{title}\n       {}", record.address),
        }
    }
    if !any {
        println!("no matches");
    }
}

async fn health() -> Result<()> {
    let app_config = load_config()?;
    let backend = BackendClient::new(&app_config.backend)?;
    backend.health().await?;
    println!("backend healthy at {}", backend.base_url());
    Ok(())
}

fn config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = init_config()?;
            println!("wrote {}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path),
        None => Ok(config_dir()?.join("siteharvest.db")),
    }
}

// ---------------------------------------------------------------------------
// Progress rendering
// ---------------------------------------------------------------------------

/// Renders progress events on an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn attach(orchestrator: &Orchestrator) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));

        let bar = spinner.clone();
        orchestrator.events().on_any(move |event| match event {
            ProgressEvent::StatusChanged { status } => {
                bar.set_message(status.to_string());
            }
            ProgressEvent::LinksDiscovered { count } => {
                bar.set_message(format!("discovered {count} candidate links"));
            }
            ProgressEvent::BatchStarted { index, total, size } => {
                bar.set_message(format!("batch {}/{total} ({size} pages)", index + 1));
            }
            ProgressEvent::UrlCrawled { address } => {
                bar.set_message(format!("crawled {address}"));
            }
            ProgressEvent::UrlFailed { address, .. } => {
                bar.set_message(format!("failed {address}"));
            }
            ProgressEvent::UrlSkipped { address, .. } => {
                bar.set_message(format!("skipped {address}"));
            }
            ProgressEvent::CrawlCompleted { completed, total, .. } => {
                bar.finish_with_message(format!("done: {completed}/{total}"));
            }
            ProgressEvent::CrawlError { message } => {
                bar.finish_with_message(format!("error: {message}"));
            }
        });

        Self { spinner }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
