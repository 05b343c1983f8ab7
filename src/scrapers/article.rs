//! Article detail page scraper.
//!
//! For every unchecked ledger row the detail page is fetched and its main
//! content container walked in document order:
//!
//! - `h2` / `h3` open a new section
//! - `p` adds its text, plus any image nested inside it, to the current section
//! - an `img` outside any paragraph is logged and dropped
//!
//! Text before the first heading becomes an implicit "Introduction"
//! section. Sections without paragraphs or images are never persisted.
//!
//! # Date and author
//!
//! `published_date` and `author` are read from the 9th and 10th `<p>` of the
//! whole page. This is positional, not semantic: on pages with fewer than ten
//! paragraphs both fields are empty strings.

use super::{element_text, parse_selector};
use crate::error::{PipelineError, Result};
use crate::fetch::Fetch;
use crate::ledger::Ledger;
use crate::models::{Article, INTRODUCTION, LinkRecord, Paragraph, Section};
use crate::outputs::json;
use chrono::Local;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));
static IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("static selector"));

/// Position of the paragraph holding the publication date.
const DATE_PARAGRAPH: usize = 8;
/// Position of the paragraph holding the author.
const AUTHOR_PARAGRAPH: usize = 9;

/// Counts for one article scraper run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeReport {
    pub pending: usize,
    pub written: usize,
    pub skipped: usize,
}

/// Accumulates sections while walking the content container.
struct SectionBuilder {
    sections: Vec<Section>,
    current: Section,
}

impl SectionBuilder {
    fn new() -> Self {
        Self {
            sections: Vec::new(),
            current: Section::new(INTRODUCTION, 2),
        }
    }

    fn heading(&mut self, title: String, level: u8) {
        let next = Section::new(title, level);
        let done = std::mem::replace(&mut self.current, next);
        self.close(done);
    }

    fn close(&mut self, mut section: Section) {
        if section.has_content() {
            section.section_id = self.sections.len() as u32 + 1;
            self.sections.push(section);
        }
    }

    fn finish(mut self) -> Vec<Section> {
        let last = std::mem::replace(&mut self.current, Section::new("", 2));
        self.close(last);
        self.sections
    }
}

fn nth_paragraph(document: &Html, n: usize) -> String {
    document
        .select(&PARAGRAPH)
        .nth(n)
        .map(|p| element_text(&p))
        .unwrap_or_default()
}

fn inside_paragraph(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "p")
}

fn resolve_image(page_url: &Url, src: &str) -> Option<String> {
    match page_url.join(src) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!(%src, error = %e, "Skipping unresolvable image URL");
            None
        }
    }
}

/// Split the content container of `html` into sections.
pub fn extract_sections(document: &Html, container: &Selector, page_url: &Url) -> Result<Vec<Section>> {
    let root = document
        .select(container)
        .next()
        .ok_or_else(|| PipelineError::NoContent(format!("no content container on {page_url}")))?;

    let mut builder = SectionBuilder::new();
    for node in root.descendants().skip(1) {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        match element.value().name() {
            name @ ("h2" | "h3") => {
                // A blank heading still closes the previous section.
                let level = if name == "h2" { 2 } else { 3 };
                builder.heading(element_text(&element), level);
            }
            "p" => {
                let text = element_text(&element);
                if !text.is_empty() {
                    builder.current.paragraphs.push(Paragraph::Text(text));
                }
                for img in element.select(&IMAGE) {
                    if let Some(src) = img.value().attr("src").and_then(|s| resolve_image(page_url, s)) {
                        builder.current.images.push(src);
                    }
                }
            }
            "img" if !inside_paragraph(&element) => {
                debug!(
                    src = element.value().attr("src").unwrap_or_default(),
                    section = %builder.current.section_title,
                    "Dropping standalone image"
                );
            }
            _ => {}
        }
    }

    Ok(builder.finish())
}

/// Parse a fetched detail page into an [`Article`].
pub fn parse_article(html: &str, record: &LinkRecord, content_selector: &str) -> Result<Article> {
    let container = parse_selector(content_selector)?;
    let page_url = Url::parse(&record.url)?;
    let document = Html::parse_document(html);

    let sections = extract_sections(&document, &container, &page_url)?;
    Ok(Article {
        title: record.title.clone(),
        url: record.url.clone(),
        published_date: nth_paragraph(&document, DATE_PARAGRAPH),
        author: nth_paragraph(&document, AUTHOR_PARAGRAPH),
        scraped_date: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        sections,
    })
}

/// Fetch, parse and persist one ledger row.
async fn scrape_one<F>(
    fetcher: &F,
    record: &LinkRecord,
    content_selector: &str,
    articles_dir: &Path,
) -> Result<std::path::PathBuf>
where
    F: Fetch<Response = String>,
{
    let html = fetcher.fetch(&record.url).await?;
    let article = parse_article(&html, record, content_selector)?;
    info!(
        sections = article.sections.len(),
        images = article.image_count(),
        "Parsed article"
    );
    json::write_article(articles_dir, &article).await
}

/// Scrape every unchecked ledger row into `articles_dir`.
///
/// A row whose fetch, parse or write fails is logged and left unchecked so
/// the next run picks it up again. Rows are marked checked only after their
/// JSON file exists.
///
/// # Arguments
///
/// * `fetcher` - Polite page fetcher used for every detail page
/// * `ledger` - Link ledger supplying unchecked rows
/// * `content_selector` - CSS selector of the article body container
/// * `articles_dir` - Directory the `{index}_{slug}.json` files go to
///
/// # Returns
///
/// A [`ScrapeReport`] with the pending, written and skipped row counts.
/// Only ledger read or write errors abort the run.
#[instrument(level = "info", skip_all, fields(articles_dir = %articles_dir.display()))]
pub async fn scrape_articles<F>(
    fetcher: &F,
    ledger: &Ledger,
    content_selector: &str,
    articles_dir: &Path,
) -> Result<ScrapeReport>
where
    F: Fetch<Response = String>,
{
    let pending = ledger.unchecked()?;
    let mut report = ScrapeReport {
        pending: pending.len(),
        ..ScrapeReport::default()
    };
    info!(pending = report.pending, "Scraping unchecked articles");

    for record in &pending {
        match scrape_one(fetcher, record, content_selector, articles_dir).await {
            Ok(path) => {
                if let Err(e) = ledger.mark_checked(&record.title, &record.url) {
                    error!(url = %record.url, error = %e, "Article saved but ledger update failed");
                }
                debug!(path = %path.display(), "Article done");
                report.written += 1;
            }
            Err(e) => {
                warn!(url = %record.url, title = %record.title, error = %e, "Skipping article");
                report.skipped += 1;
            }
        }
    }

    info!(
        written = report.written,
        skipped = report.skipped,
        "Article scraping finished"
    );
    Ok(report)
}
