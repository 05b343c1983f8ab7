//! Data models for the ledger and the scraped article corpus.
//!
//! - [`LinkRecord`]: one row of the CSV link ledger
//! - [`Article`]: one scraped article, persisted as a JSON document
//! - [`Section`]: a titled span of an article between two headings
//! - [`Paragraph`]: plain text, or an `{original, summary}` pair once the
//!   summarizer has touched it

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Literal summary written when the model call fails.
pub const SUMMARY_ERROR: &str = "Error generating summary";

/// Title of the implicit section holding text before the first heading.
pub const INTRODUCTION: &str = "Introduction";

/// A discovered article link and its processing flags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkRecord {
    pub title: String,
    pub url: String,
    /// Set once the article JSON has been written.
    #[serde(default, with = "flag")]
    pub checked: bool,
    /// Set once every image of the article is on disk.
    #[serde(default, with = "flag")]
    pub images_downloaded: bool,
}

impl LinkRecord {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            checked: false,
            images_downloaded: false,
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.title, &self.url)
    }
}

/// Booleans in the ledger are written `True` / `False` and read leniently.
mod flag {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" | "nan" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean flag `{other}`"
            ))),
        }
    }
}

/// A paragraph of article text.
///
/// Freshly scraped paragraphs are plain strings. The summarizer rewrites
/// them into `{original, summary}` objects; an object without `summary` is
/// a half-processed entry that still needs a summary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Paragraph {
    Text(String),
    Summarized {
        original: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl Paragraph {
    /// The scraped text, whether or not it has been summarized.
    pub fn original(&self) -> &str {
        match self {
            Paragraph::Text(text) => text,
            Paragraph::Summarized { original, .. } => original,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Paragraph::Text(_) => None,
            Paragraph::Summarized { summary, .. } => summary.as_deref(),
        }
    }

    /// True until a `summary` is attached, even an error placeholder.
    pub fn needs_summarization(&self) -> bool {
        self.summary().is_none()
    }

    /// Summary when available, otherwise the original text.
    pub fn display_text(&self) -> &str {
        self.summary().unwrap_or_else(|| self.original())
    }
}

impl From<&str> for Paragraph {
    fn from(text: &str) -> Self {
        Paragraph::Text(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Section {
    pub section_id: u32,
    pub section_title: String,
    /// Heading level: 2 or 3.
    pub section_level: u8,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Section {
    pub fn new(section_title: impl Into<String>, section_level: u8) -> Self {
        Self {
            section_id: 0,
            section_title: section_title.into(),
            section_level,
            paragraphs: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.paragraphs.is_empty() || !self.images.is_empty()
    }
}

/// A scraped article as stored in `{index}_{slug}.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub scraped_date: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Article {
    pub fn image_count(&self) -> usize {
        self.sections.iter().map(|s| s.images.len()).sum()
    }

    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.sections.iter().flat_map(|s| s.paragraphs.iter())
    }

    pub fn is_fully_summarized(&self) -> bool {
        self.paragraphs().all(|p| !p.needs_summarization())
    }
}
