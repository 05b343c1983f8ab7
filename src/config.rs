//! YAML configuration for the pipeline.
//!
//! The configuration is loaded once in `main` and handed to every stage by
//! reference. Every field except `sources` has a default so a minimal file
//! only needs to list the blog to scrape:
//!
//! ```yaml
//! sources:
//!   - https://research.google/blog/
//! ```

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Listing pages to scrape, either as a plain list or as `name: url` pairs.
///
/// Named sources keep the order in which they appear in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Sources {
    List(Vec<String>),
    Named(serde_yaml::Mapping),
}

impl Default for Sources {
    fn default() -> Self {
        Sources::List(Vec::new())
    }
}

impl Sources {
    /// Return the listing URL at `index`, if any.
    pub fn get(&self, index: usize) -> Option<String> {
        match self {
            Sources::List(urls) => urls.get(index).cloned(),
            Sources::Named(map) => map
                .values()
                .nth(index)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Sources::List(urls) => urls.len(),
            Sources::Named(map) => map.len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub links_csv: PathBuf,
    pub articles_dir: PathBuf,
    pub images_dir: PathBuf,
    pub read_status: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            links_csv: PathBuf::from("./data/raw/google_ai_links.csv"),
            articles_dir: PathBuf::from("./data/processed/google_articles"),
            images_dir: PathBuf::from("./images"),
            read_status: PathBuf::from("./data/processed/read_status.json"),
        }
    }
}

/// CSS selectors used against the listing and detail pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// One teaser card on the listing page.
    pub card: String,
    /// Title element inside a card.
    pub title: String,
    /// Link inside a card.
    pub link: String,
    /// Main content container on a detail page.
    pub content: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            card: "li.glue-grid__col".to_string(),
            title: "span.headline-5".to_string(),
            link: "a[href]".to_string(),
            content: "article, main".to_string(),
        }
    }
}

/// Local text-generation server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the server, without the `/api/generate` path.
    pub endpoint: String,
    pub model: String,
    /// Start `server_command` when nothing answers on `endpoint`.
    pub manage_server: bool,
    pub server_command: Vec<String>,
    /// Seconds to wait for a freshly started server to answer.
    pub startup_timeout: u64,
    /// Per-generation timeout in seconds.
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "mistral".to_string(),
            manage_server: false,
            server_command: vec!["ollama".to_string(), "serve".to_string()],
            startup_timeout: 30,
            timeout: 300,
        }
    }
}

impl LlmConfig {
    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: Sources,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub requests_per_second: f64,
    pub max_retries: usize,
    /// Base retry delay in seconds, doubled after every failed attempt.
    pub retry_delay: f64,
    pub user_agent: Option<String>,
    pub paths: Paths,
    pub selectors: Selectors,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Sources::default(),
            timeout: 30,
            requests_per_second: 1.0,
            max_retries: 3,
            retry_delay: 2.0,
            user_agent: None,
            paths: Paths::default(),
            selectors: Selectors::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Read and parse the YAML file at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&text)?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Minimum wall-clock gap between two throttled requests.
    pub fn min_interval(&self) -> Duration {
        if self.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        } else {
            Duration::ZERO
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    /// The user agent is mandatory for every stage that talks to the blog.
    pub fn require_user_agent(&self) -> Result<&str> {
        self.user_agent
            .as_deref()
            .filter(|ua| !ua.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Config(
                    "USER_AGENT must be set (--user-agent, USER_AGENT env or config file)"
                        .to_string(),
                )
            })
    }

    pub fn source_url(&self, index: usize) -> Result<String> {
        self.sources
            .get(index)
            .ok_or_else(|| PipelineError::Config(format!("no source URL at index {index}")))
    }
}
