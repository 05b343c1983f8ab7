//! # research_digest
//!
//! Scrapes a research blog into a local corpus and lets you read it from the
//! terminal.
//!
//! ## Usage
//!
//! ```sh
//! research_digest --user-agent "digest-bot/1.0 (me@example.org)" run
//! research_digest list --title diffusion
//! ```
//!
//! ## Architecture
//!
//! The pipeline is a chain of stages that only share files on disk:
//! 1. **Links**: listing page → link ledger CSV
//! 2. **Articles**: unchecked ledger rows → `{index}_{slug}.json`
//! 3. **Images**: article JSON → `images/article_{index}/image_{section}.jpg`
//! 4. **Summarize**: plain paragraphs → `{original, summary}` via a local model
//!
//! Every stage can be run on its own and rerun safely; the ledger flags and
//! the files already on disk decide what is left to do.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod fetch;
mod images;
mod ledger;
mod models;
mod outputs;
mod scrapers;
mod server;
mod summarizer;
mod utils;
mod viewer;

use cli::{Cli, Command};
use config::Config;
use fetch::{image_fetcher, polite_fetcher};
use ledger::Ledger;
use utils::ensure_writable_dir;
use viewer::{Filter, ListOptions};

async fn run_links(config: &Config, source: usize) -> error::Result<usize> {
    let fetcher = polite_fetcher(config)?;
    let ledger = Ledger::new(&config.paths.links_csv);
    let added = scrapers::links::scrape_homepage(config, &fetcher, &ledger, source).await?;
    info!(added, ledger = %ledger.path().display(), "Link stage finished");
    Ok(added)
}

async fn run_articles(config: &Config) -> error::Result<()> {
    let fetcher = polite_fetcher(config)?;
    let ledger = Ledger::new(&config.paths.links_csv);
    let report = scrapers::article::scrape_articles(
        &fetcher,
        &ledger,
        &config.selectors.content,
        &config.paths.articles_dir,
    )
    .await?;
    info!(
        pending = report.pending,
        written = report.written,
        skipped = report.skipped,
        "Article stage finished"
    );
    Ok(())
}

async fn run_images(config: &Config) -> error::Result<()> {
    let fetcher = image_fetcher(config)?;
    let ledger = Ledger::new(&config.paths.links_csv);
    let reports = images::download_all(
        &fetcher,
        &ledger,
        &config.paths.articles_dir,
        &config.paths.images_dir,
    )
    .await?;
    let incomplete = reports.iter().filter(|r| !r.all_succeeded()).count();
    info!(articles = reports.len(), incomplete, "Image stage finished");
    Ok(())
}

async fn run_summarize(config: &Config) -> error::Result<()> {
    let report = summarizer::run(config).await?;
    debug!(?report, "Summary stage report");
    Ok(())
}

/// Run every stage in order. A failed stage is logged and the next one
/// still runs, since each works from what is already on disk.
#[instrument(level = "info", skip_all)]
async fn run_all(config: &Config) {
    if let Err(e) = run_links(config, 0).await {
        error!(error = %e, "Link stage failed");
    }
    if let Err(e) = run_articles(config).await {
        error!(error = %e, "Article stage failed");
    }
    if let Err(e) = run_images(config).await {
        error!(error = %e, "Image stage failed");
    }
    if let Err(e) = run_summarize(config).await {
        error!(error = %e, "Summary stage failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(config = %args.config.display(), command = ?args.command, "Parsed CLI arguments");

    let mut config = Config::load(&args.config).map_err(|e| {
        error!(path = %args.config.display(), error = %e, "Could not load configuration");
        e
    })?;
    if let Some(user_agent) = args.user_agent.clone() {
        config.user_agent = Some(user_agent);
    }

    // Scraping without a user agent is refused before any request goes out.
    if args.command.needs_user_agent() {
        if let Err(e) = config.require_user_agent() {
            error!(error = %e, "Missing user agent");
            return Err(e.into());
        }
    }

    if args.command.writes_data() {
        for dir in [&config.paths.articles_dir, &config.paths.images_dir] {
            if let Err(e) = ensure_writable_dir(dir).await {
                error!(
                    path = %dir.display(),
                    error = %e,
                    "Output directory is not writable (fix perms or choose a different path)"
                );
                return Err(e);
            }
        }
    }

    match args.command {
        Command::Run => run_all(&config).await,
        Command::Links { source } => {
            run_links(&config, source).await?;
        }
        Command::Articles => run_articles(&config).await?,
        Command::Images => run_images(&config).await?,
        Command::Summarize => run_summarize(&config).await?,
        Command::List {
            from,
            to,
            title,
            content,
            sort,
            page,
            per_page,
        } => {
            let options = ListOptions {
                filter: Filter {
                    from,
                    to,
                    title,
                    content,
                },
                sort,
                page,
                per_page,
            };
            print!("{}", viewer::list(&config, &options).await?);
        }
        Command::Show { index } => print!("{}", viewer::show(&config, index).await?),
        Command::Mark { index, unread } => {
            println!("{}", viewer::mark(&config, index, !unread).await?);
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
