//! Command-line interface definitions for research_digest.
//!
//! Global options can also come from environment variables; a `.env` file
//! in the working directory is loaded before parsing.

use crate::viewer::SortOrder;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the research_digest pipeline.
///
/// # Examples
///
/// ```sh
/// # Whole pipeline: links, articles, images, summaries
/// research_digest --user-agent "digest-bot/1.0 (me@example.org)" run
///
/// # Browse what has been collected
/// research_digest list --title robot --sort title-asc
/// research_digest show 3
/// research_digest mark 3
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    pub config: PathBuf,

    /// User agent sent with every request to the blog
    #[arg(long, global = true, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run links, articles, images and summarize in sequence
    Run,
    /// Scrape the listing page into the link ledger
    Links {
        /// Index into the configured sources
        #[arg(short, long, default_value_t = 0)]
        source: usize,
    },
    /// Scrape every unchecked ledger row into an article JSON file
    Articles,
    /// Download the images referenced by stored articles
    Images,
    /// Summarize every pending paragraph with the local model
    Summarize,
    /// List stored articles
    List {
        /// Earliest publication date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest publication date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Search in article and section titles
        #[arg(short, long)]
        title: Option<String>,
        /// Search in paragraph text and summaries
        #[arg(long)]
        content: Option<String>,
        #[arg(short, long, value_enum, default_value_t = SortOrder::DateDesc)]
        sort: SortOrder,
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        /// Rows per page; 0 shows everything
        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },
    /// Print one article
    Show {
        /// Numeric prefix of the article file
        index: u32,
    },
    /// Flag an article as read
    Mark {
        index: u32,
        /// Clear the flag instead
        #[arg(long)]
        unread: bool,
    },
}

impl Command {
    /// Stages that talk to the blog and therefore need a user agent.
    pub fn needs_user_agent(&self) -> bool {
        matches!(
            self,
            Command::Run | Command::Links { .. } | Command::Articles | Command::Images
        )
    }

    /// Stages that write under the configured data directories.
    pub fn writes_data(&self) -> bool {
        !matches!(self, Command::List { .. } | Command::Show { .. })
    }
}
