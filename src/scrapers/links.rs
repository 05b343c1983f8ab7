//! Listing page scraper.
//!
//! Reads the configured blog listing page, extracts every teaser card that
//! carries both a title and a link, and merges the pairs into the ledger as
//! unchecked rows. There is no pagination and no crawling beyond the one
//! listing page.

use super::{element_text, parse_selector};
use crate::config::{Config, Selectors};
use crate::error::{PipelineError, Result};
use crate::fetch::Fetch;
use crate::ledger::Ledger;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Resolve a card href to an absolute URL.
///
/// Hrefs already starting with `http` are kept as they are; anything else
/// is resolved against the origin of the listing page.
pub fn resolve_link(base_url: &Url, href: &str) -> Result<String> {
    if href.starts_with("http") {
        return Ok(href.to_string());
    }
    let origin = Url::parse(&base_url.origin().ascii_serialization())?;
    Ok(origin.join(href)?.to_string())
}

/// Extract `(title, absolute url)` pairs from a listing page.
///
/// Cards missing either the title element or a link with an `href` are
/// logged and skipped. A title element with no text still counts and gives
/// an empty title.
pub fn extract_links(
    html: &str,
    base_url: &Url,
    selectors: &Selectors,
) -> Result<Vec<(String, String)>> {
    let card_selector = parse_selector(&selectors.card)?;
    let title_selector = parse_selector(&selectors.title)?;
    let link_selector = parse_selector(&selectors.link)?;

    let document = Html::parse_document(html);
    let mut links = Vec::new();
    let mut cards = 0usize;

    for card in document.select(&card_selector) {
        cards += 1;
        let title = card.select(&title_selector).next().map(|t| element_text(&t));
        let href = card
            .select(&link_selector)
            .find_map(|a| a.value().attr("href"));

        match (title, href) {
            (Some(title), Some(href)) => match resolve_link(base_url, href) {
                Ok(url) => links.push((title, url)),
                Err(e) => warn!(%href, error = %e, "Could not resolve card link"),
            },
            _ => warn!(card = cards, "Missing title or link in a card"),
        }
    }

    info!(cards, links = links.len(), "Extracted listing cards");
    Ok(links)
}

/// Scrape the listing page at `sources[source_index]` into the ledger.
///
/// Returns the number of rows added. Errors when the page cannot be fetched
/// or carries no usable card; the caller decides whether that ends the run.
#[instrument(level = "info", skip_all, fields(source_index = source_index))]
pub async fn scrape_homepage<F>(
    config: &Config,
    fetcher: &F,
    ledger: &Ledger,
    source_index: usize,
) -> Result<usize>
where
    F: Fetch<Response = String>,
{
    let base = config.source_url(source_index)?;
    let base_url = Url::parse(&base)?;
    info!(url = %base_url, "Fetching listing page");

    let html = fetcher.fetch(base_url.as_str()).await?;
    let links = extract_links(&html, &base_url, &config.selectors)?;
    if links.is_empty() {
        return Err(PipelineError::NoContent(format!(
            "no article cards found on {base_url}"
        )));
    }
    debug!(links = ?links, "Listing links");

    ledger.merge_links(&links)
}
