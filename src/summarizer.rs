//! Paragraph summarization.
//!
//! Rewrites every plain-text paragraph of every stored article into an
//! `{original, summary}` entry, one generation request per paragraph. Work
//! already done is never repeated: any paragraph carrying a summary, even
//! the error placeholder, is left untouched, so an interrupted run resumes
//! where it stopped.

use crate::api::{AskAsync, OllamaClient, check_connection};
use crate::config::Config;
use crate::error::Result;
use crate::models::{Article, Paragraph, SUMMARY_ERROR};
use crate::outputs::json::{article_files, read_article, save_article};
use crate::server::ModelServer;
use crate::utils::truncate_for_log;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};

/// Build the generation prompt for one paragraph.
pub fn prompt(paragraph: &str) -> String {
    format!("Summarize this paragraph concisely in 1-2 sentences:\n\n{paragraph}")
}

/// Ask for one summary; any failure yields [`SUMMARY_ERROR`].
pub async fn summarize_paragraph<A>(asker: &A, paragraph: &str) -> String
where
    A: AskAsync<Response = String>,
{
    match asker.ask(&prompt(paragraph)).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(
                error = %e,
                paragraph = %truncate_for_log(paragraph, 80),
                "Summary failed; storing placeholder"
            );
            SUMMARY_ERROR.to_string()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArticleOutcome {
    pub requests: usize,
    pub changed: bool,
}

/// Summarize the pending paragraphs of one article in place.
pub async fn summarize_article<A>(asker: &A, article: &mut Article) -> ArticleOutcome
where
    A: AskAsync<Response = String>,
{
    let mut outcome = ArticleOutcome::default();

    for section in &mut article.sections {
        let mut rewritten = Vec::with_capacity(section.paragraphs.len());
        for paragraph in section.paragraphs.drain(..) {
            if matches!(&paragraph, Paragraph::Text(text) if text.trim().is_empty()) {
                outcome.changed = true;
                continue;
            }
            if !paragraph.needs_summarization() {
                rewritten.push(paragraph);
                continue;
            }
            let original = paragraph.original().to_string();
            let summary = summarize_paragraph(asker, &original).await;
            outcome.requests += 1;
            outcome.changed = true;
            rewritten.push(Paragraph::Summarized {
                original,
                summary: Some(summary),
            });
        }
        section.paragraphs = rewritten;
    }

    outcome
}

/// Summarize one article file, rewriting it only when something changed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn summarize_file<A>(asker: &A, path: &Path) -> Result<ArticleOutcome>
where
    A: AskAsync<Response = String>,
{
    let mut article = read_article(path).await?;
    if article.is_fully_summarized() {
        debug!("Already summarized");
        return Ok(ArticleOutcome::default());
    }
    let outcome = summarize_article(asker, &mut article).await;
    if outcome.changed {
        save_article(path, &article).await?;
        info!(requests = outcome.requests, "Saved summarized article");
    }
    Ok(outcome)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SummaryReport {
    pub files: usize,
    pub updated: usize,
    pub requests: usize,
    pub failed: usize,
}

/// Summarize every article in `dir`; unreadable files are logged and skipped.
///
/// # Arguments
///
/// * `asker` - Model client answering one prompt per paragraph
/// * `dir` - Directory of stored article JSON files
///
/// # Returns
///
/// A [`SummaryReport`] with totals over all files. Files are rewritten only
/// when at least one paragraph changed.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn summarize_all<A>(asker: &A, dir: &Path) -> Result<SummaryReport>
where
    A: AskAsync<Response = String>,
{
    let mut report = SummaryReport::default();
    for path in article_files(dir).await? {
        report.files += 1;
        match summarize_file(asker, &path).await {
            Ok(outcome) => {
                report.requests += outcome.requests;
                if outcome.changed {
                    report.updated += 1;
                }
            }
            Err(e) => {
                report.failed += 1;
                error!(path = %path.display(), error = %e, "Could not summarize article");
            }
        }
    }
    info!(
        files = report.files,
        updated = report.updated,
        requests = report.requests,
        failed = report.failed,
        "Summarization finished"
    );
    Ok(report)
}

/// Run the whole stage against the configured model server.
///
/// The server is released on every path once it has been acquired.
pub async fn run(config: &Config) -> Result<SummaryReport> {
    let server = ModelServer::acquire(&config.llm).await?;
    debug!(owned = server.is_owned(), "Model server acquired");
    let result = async {
        let client = OllamaClient::new(&config.llm)?;
        check_connection(&client).await?;
        summarize_all(&client, &config.paths.articles_dir).await
    }
    .await;
    if let Err(e) = server.release().await {
        warn!(error = %e, "Could not stop model server");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::Section;
    use crate::outputs::json::write_article;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records prompts; fails for prompts containing "boom".
    #[derive(Default)]
    struct Scripted {
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl AskAsync for Scripted {
        type Response = String;

        async fn ask(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("boom") {
                return Err(PipelineError::Status {
                    status: 500,
                    url: "http://localhost:11434/api/generate".to_string(),
                });
            }
            let text = prompt.rsplit("\n\n").next().unwrap_or_default();
            Ok(format!("short: {text}"))
        }
    }

    fn article(paragraphs: Vec<Paragraph>) -> Article {
        let mut section = Section::new("Introduction", 2);
        section.section_id = 1;
        section.paragraphs = paragraphs;
        Article {
            title: "Alpha".to_string(),
            url: "https://e.com/alpha".to_string(),
            published_date: String::new(),
            author: String::new(),
            scraped_date: String::new(),
            sections: vec![section],
        }
    }

    #[test]
    fn test_prompt_text() {
        assert_eq!(
            prompt("x"),
            "Summarize this paragraph concisely in 1-2 sentences:\n\nx"
        );
    }

    #[tokio::test]
    async fn test_failure_stores_placeholder_and_is_not_retried() {
        let asker = Scripted::default();
        let mut doc = article(vec!["boom".into(), "fine".into()]);

        let first = summarize_article(&asker, &mut doc).await;
        assert_eq!(first.requests, 2);
        let paragraphs = &doc.sections[0].paragraphs;
        assert_eq!(paragraphs[0].summary(), Some(SUMMARY_ERROR));
        assert_eq!(paragraphs[1].summary(), Some("short: fine"));

        let second = summarize_article(&asker, &mut doc).await;
        assert_eq!(second, ArticleOutcome::default());
        assert_eq!(asker.calls(), 2);
    }

    #[tokio::test]
    async fn test_half_processed_entries_are_resumed() {
        let asker = Scripted::default();
        let mut doc = article(vec![
            Paragraph::Summarized {
                original: "done".to_string(),
                summary: Some("already".to_string()),
            },
            Paragraph::Summarized {
                original: "pending".to_string(),
                summary: None,
            },
            "   ".into(),
        ]);

        let outcome = summarize_article(&asker, &mut doc).await;
        assert_eq!(outcome.requests, 1);
        assert!(outcome.changed);
        assert_eq!(doc.sections[0].paragraphs.len(), 2);
        assert_eq!(doc.sections[0].paragraphs[1].summary(), Some("short: pending"));
        assert!(doc.is_fully_summarized());
    }

    #[tokio::test]
    async fn test_summarize_all_rewrites_once() {
        let dir = tempdir().unwrap();
        let path = write_article(dir.path(), &article(vec!["one".into()]))
            .await
            .unwrap();
        std::fs::write(dir.path().join("5_broken.json"), "not json").unwrap();
        let asker = Scripted::default();

        let report = summarize_all(&asker, dir.path()).await.unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.requests, 1);

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        let again = summarize_all(&asker, dir.path()).await.unwrap();
        assert_eq!(again.requests, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);

        let stored = read_article(&path).await.unwrap();
        assert_eq!(stored.sections[0].paragraphs[0].summary(), Some("short: one"));
    }
}
