//! Article JSON documents on disk.
//!
//! Every article lives in its own pretty-printed file named
//! `{index}_{slug}.json`. The index is one greater than the largest index
//! already present in the directory, so indices keep growing across runs
//! even when files are deleted in between.
//!
//! ```text
//! articles_dir/
//! ├── 0_introducing-a-new-model.json
//! ├── 1_scaling-laws-revisited.json
//! └── 2_robots-that-learn.json
//! ```

use crate::error::{PipelineError, Result};
use crate::models::Article;
use crate::utils::file_slug;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// Parse the numeric prefix of an article filename.
///
/// `"12_some-title.json"` gives `Some(12)`; files without a numeric prefix
/// give `None`.
pub fn article_index(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .split('_')
        .next()?
        .parse()
        .ok()
}

/// Every `*.json` file in `dir`, ordered by index then by name.
///
/// A missing directory yields an empty list.
pub async fn article_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| {
        (article_index(a).unwrap_or(u32::MAX), a.file_name())
            .cmp(&(article_index(b).unwrap_or(u32::MAX), b.file_name()))
    });
    Ok(files)
}

/// Index the next article written to `dir` will receive.
///
/// Errors instead of wrapping around when the largest index is `u32::MAX`.
pub async fn next_index(dir: &Path) -> Result<u32> {
    let max = article_files(dir)
        .await?
        .iter()
        .filter_map(|p| article_index(p))
        .max();
    match max {
        None => Ok(0),
        Some(max) => max.checked_add(1).ok_or_else(|| {
            PipelineError::IndexExhausted(dir.display().to_string())
        }),
    }
}

/// Write a new article file and return its path.
#[instrument(level = "info", skip_all, fields(dir = %dir.display(), title = %article.title))]
pub async fn write_article(dir: &Path, article: &Article) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let index = next_index(dir).await?;
    let path = dir.join(format!("{}_{}.json", index, file_slug(&article.title)));
    save_article(&path, article).await?;
    info!(path = %path.display(), index, "Wrote article JSON");
    Ok(path)
}

pub async fn read_article(path: &Path) -> Result<Article> {
    let text = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Overwrite the article stored at `path`.
pub async fn save_article(path: &Path, article: &Article) -> Result<()> {
    let json = serde_json::to_string_pretty(article)?;
    fs::write(path, json).await?;
    debug!(path = %path.display(), "Saved article JSON");
    Ok(())
}
