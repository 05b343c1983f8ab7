//! Scrapers for the listing page and the article detail pages.
//!
//! The pipeline scrapes in two phases:
//!
//! 1. **Indexing** ([`links`]): read the listing page, extract teaser cards
//!    and merge their `(title, url)` pairs into the ledger
//! 2. **Fetching** ([`article`]): visit every unchecked ledger row, split the
//!    detail page into sections and persist it as JSON
//!
//! Both phases fetch through the same throttled, retrying page fetcher and
//! log and skip anything that fails instead of aborting the batch.

pub mod article;
pub mod links;

use crate::error::{PipelineError, Result};
use scraper::{ElementRef, Selector};

/// Parse a CSS selector from configuration.
pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| PipelineError::Selector(selector.to_string()))
}

/// Text content of an element with runs of whitespace collapsed.
pub(crate) fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_parse_selector() {
        assert!(parse_selector("li.glue-grid__col").is_ok());
        assert!(matches!(
            parse_selector("li[["),
            Err(PipelineError::Selector(_))
        ));
    }

    #[test]
    fn test_element_text_collapses_whitespace() {
        let html = Html::parse_fragment("<p>  Hello\n   <b>bold</b>\tworld </p>");
        let p = html.select(&parse_selector("p").unwrap()).next().unwrap();
        assert_eq!(element_text(&p), "Hello bold world");
    }
}
