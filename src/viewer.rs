//! Terminal read path over the stored articles.
//!
//! Loads every article JSON, filters, sorts and pages the list, renders a
//! table or a single article, and keeps per-article read flags in a small
//! JSON map keyed by file path.

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::images::article_image_dir;
use crate::models::Article;
use crate::outputs::json::{article_files, article_index, read_article};
use chrono::NaiveDate;
use comfy_table::{Cell, Row, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

const DATE_FORMATS: [&str; 3] = ["%B %d, %Y", "%Y-%m-%d", "%d/%m/%Y"];
const TITLE_WIDTH: usize = 50;

static LOCAL_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^image_(\d+)(?:\.(\d+))?\.(?:jpg|jpeg|png)$").expect("static regex"));

/// Parse a free-text publication date.
///
/// Unparseable or empty input maps to [`NaiveDate::MIN`] so it sorts first.
pub fn parse_date(text: &str) -> NaiveDate {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .unwrap_or(NaiveDate::MIN)
}

/// One loaded article together with where it came from.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Read-status key: the file path as displayed.
    pub key: String,
    pub path: PathBuf,
    pub index: Option<u32>,
    pub article: Article,
}

impl Entry {
    pub fn date(&self) -> NaiveDate {
        parse_date(&self.article.published_date)
    }
}

/// Load every article in `dir`; unreadable files are logged and skipped.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
pub async fn load_articles(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for path in article_files(dir).await? {
        match read_article(&path).await {
            Ok(article) => entries.push(Entry {
                key: path.display().to_string(),
                index: article_index(&path),
                path,
                article,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable article"),
        }
    }
    debug!(count = entries.len(), "Loaded articles");
    Ok(entries)
}

#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Matched against the title and every section title.
    pub title: Option<String>,
    /// Matched against paragraph originals and summaries.
    pub content: Option<String>,
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

impl Filter {
    pub fn matches(&self, entry: &Entry) -> bool {
        let date = entry.date();
        if self.from.is_some_and(|from| date < from) || self.to.is_some_and(|to| date > to) {
            return false;
        }

        let article = &entry.article;
        if let Some(needle) = self.title.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let hit = contains_ci(&article.title, &needle)
                || article
                    .sections
                    .iter()
                    .any(|s| contains_ci(&s.section_title, &needle));
            if !hit {
                return false;
            }
        }
        if let Some(needle) = self.content.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let hit = article.paragraphs().any(|p| {
                contains_ci(p.original(), &needle)
                    || p.summary().is_some_and(|s| contains_ci(s, &needle))
            });
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, entries: Vec<Entry>) -> Vec<Entry> {
        entries.into_iter().filter(|e| self.matches(e)).collect()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
    TitleAsc,
    TitleDesc,
}

pub fn sort_entries(entries: &mut [Entry], order: SortOrder) {
    match order {
        SortOrder::DateDesc => entries.sort_by_key(|e| std::cmp::Reverse(e.date())),
        SortOrder::DateAsc => entries.sort_by_key(Entry::date),
        SortOrder::TitleAsc => entries.sort_by_key(|e| e.article.title.to_lowercase()),
        SortOrder::TitleDesc => {
            entries.sort_by_key(|e| std::cmp::Reverse(e.article.title.to_lowercase()))
        }
    }
}

/// Slice out 1-based `page` of `per_page` items; `per_page == 0` shows all.
pub fn paginate<T>(items: &[T], page: usize, per_page: usize) -> &[T] {
    if per_page == 0 {
        return items;
    }
    let start = page.saturating_sub(1).saturating_mul(per_page).min(items.len());
    let end = start.saturating_add(per_page).min(items.len());
    &items[start..end]
}

pub fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        1
    } else {
        total.div_ceil(per_page).max(1)
    }
}

/// Read flags keyed by article file path, stored as one flat JSON object.
#[derive(Debug, Clone)]
pub struct ReadStatus {
    path: PathBuf,
    flags: BTreeMap<String, bool>,
}

impl ReadStatus {
    pub async fn load(path: &Path) -> Result<Self> {
        let flags = match fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            flags,
        })
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serde_json::to_string(&self.flags)?).await?;
        Ok(())
    }

    pub fn is_read(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, read: bool) {
        self.flags.insert(key.to_string(), read);
    }
}

fn short_title(title: &str) -> String {
    if title.chars().count() > TITLE_WIDTH {
        format!("{}...", title.chars().take(TITLE_WIDTH).collect::<String>())
    } else {
        title.to_string()
    }
}

pub fn render_table(entries: &[Entry], status: &ReadStatus) -> String {
    let mut table = Table::new();
    table.set_header(vec!["#", "Title", "Date", "Read", "Source"]);
    for entry in entries {
        let index = entry.index.map_or_else(|| "-".to_string(), |i| i.to_string());
        let date = entry
            .article
            .published_date
            .split_whitespace()
            .next()
            .unwrap_or("");
        let read = if status.is_read(&entry.key) { "[x]" } else { "[ ]" };
        let mut row = Row::new();
        row.add_cell(Cell::new(index))
            .add_cell(Cell::new(short_title(&entry.article.title)))
            .add_cell(Cell::new(date))
            .add_cell(Cell::new(read))
            .add_cell(Cell::new(&entry.article.url));
        table.add_row(row);
    }
    format!("{table}\n")
}

/// Images for one section found under `images_root`, ordered by ordinal.
pub fn local_images(images_root: &Path, article_index: u32, section_id: u32) -> Vec<PathBuf> {
    let dir = article_image_dir(images_root, article_index);
    let Ok(read_dir) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut found: Vec<(u32, PathBuf)> = read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let caps = LOCAL_IMAGE.captures(&name)?;
            if caps[1].parse::<u32>().ok()? != section_id {
                return None;
            }
            let ordinal = caps.get(2).map_or(Some(1), |m| m.as_str().parse().ok())?;
            Some((ordinal, entry.path()))
        })
        .collect();
    found.sort();
    found.into_iter().map(|(_, path)| path).collect()
}

pub fn render_article(entry: &Entry, images_root: &Path) -> String {
    let article = &entry.article;
    let mut out = String::new();
    let _ = writeln!(out, "{}", article.title);
    if !article.published_date.is_empty() {
        let _ = writeln!(out, "Published: {}", article.published_date);
    }
    if !article.url.is_empty() {
        let _ = writeln!(out, "Source: {}", article.url);
    }
    let _ = writeln!(out, "{}", "-".repeat(60));

    for section in &article.sections {
        let marker = if section.section_level >= 3 { "###" } else { "##" };
        let _ = writeln!(out, "\n{marker} {}", section.section_title);
        if let Some(index) = entry.index {
            for image in local_images(images_root, index, section.section_id) {
                let _ = writeln!(out, "[image] {}", image.display());
            }
        }
        for paragraph in &section.paragraphs {
            let _ = writeln!(out, "\n{}", paragraph.display_text());
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub filter: Filter,
    pub sort: SortOrder,
    pub page: usize,
    pub per_page: usize,
}

fn find_entry(entries: Vec<Entry>, index: u32) -> Result<Entry> {
    entries
        .into_iter()
        .find(|e| e.index == Some(index))
        .ok_or_else(|| PipelineError::NoContent(format!("no article with index {index}")))
}

/// Render one page of the filtered, sorted article table.
pub async fn list(config: &Config, options: &ListOptions) -> Result<String> {
    let status = ReadStatus::load(&config.paths.read_status).await?;
    let mut entries = options.filter.apply(load_articles(&config.paths.articles_dir).await?);
    sort_entries(&mut entries, options.sort);

    let pages = page_count(entries.len(), options.per_page);
    let mut out = render_table(paginate(&entries, options.page, options.per_page), &status);
    let _ = writeln!(
        out,
        "\n{} matching articles, page {}/{}",
        entries.len(),
        options.page.max(1),
        pages
    );
    status.save().await?;
    Ok(out)
}

pub async fn show(config: &Config, index: u32) -> Result<String> {
    let status = ReadStatus::load(&config.paths.read_status).await?;
    let entry = find_entry(load_articles(&config.paths.articles_dir).await?, index)?;
    debug!(path = %entry.path.display(), "Rendering article");
    let out = render_article(&entry, &config.paths.images_dir);
    status.save().await?;
    Ok(out)
}

pub async fn mark(config: &Config, index: u32, read: bool) -> Result<String> {
    let mut status = ReadStatus::load(&config.paths.read_status).await?;
    let entry = find_entry(load_articles(&config.paths.articles_dir).await?, index)?;
    status.set(&entry.key, read);
    status.save().await?;
    info!(key = %entry.key, read, "Updated read flag");
    Ok(format!(
        "{} marked as {}",
        entry.article.title,
        if read { "read" } else { "unread" }
    ))
}
