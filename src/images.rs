//! Image downloader.
//!
//! Every image URL collected by the article scraper is stored under a
//! deterministic path:
//!
//! ```text
//! images_dir/
//! └── article_3/
//!     ├── image_1.jpg      # first image of section 1
//!     ├── image_1.2.jpg    # second image of section 1
//!     └── image_4.jpg      # first image of section 4
//! ```
//!
//! A target that already exists with a non-zero size is never fetched
//! again, so a rerun after a partial failure only downloads what is
//! missing. The ledger's `images_downloaded` flag is set once every image of
//! an article is on disk.

use crate::error::Result;
use crate::fetch::Fetch;
use crate::ledger::Ledger;
use crate::models::Article;
use crate::outputs::json;
use crate::utils::{dir_has_entries, non_empty_file};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of downloading one article's images.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub article_index: u32,
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The article was already complete and nothing was checked.
    pub already_done: bool,
}

impl DownloadReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Folder holding the images of the article with this index.
pub fn article_image_dir(images_root: &Path, article_index: u32) -> PathBuf {
    images_root.join(format!("article_{article_index}"))
}

/// Filename for the `ordinal`-th (1-based) image of a section.
///
/// The first image has no suffix; later ones get `.{ordinal}`.
pub fn image_file_name(section_id: u32, ordinal: usize) -> String {
    if ordinal <= 1 {
        format!("image_{section_id}.jpg")
    } else {
        format!("image_{section_id}.{ordinal}.jpg")
    }
}

pub fn image_path(images_root: &Path, article_index: u32, section_id: u32, ordinal: usize) -> PathBuf {
    article_image_dir(images_root, article_index).join(image_file_name(section_id, ordinal))
}

async fn save_image<F>(fetcher: &F, url: &str, path: &Path) -> Result<()>
where
    F: Fetch<Response = Vec<u8>>,
{
    let bytes = fetcher.fetch(url).await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, &bytes).await?;
    Ok(())
}

/// Download every image of `article`, skipping files already on disk.
///
/// Failures are counted per image and never stop the remaining downloads.
#[instrument(level = "info", skip_all, fields(article_index = article_index, title = %article.title))]
pub async fn download_article_images<F>(
    fetcher: &F,
    article: &Article,
    article_index: u32,
    images_root: &Path,
) -> DownloadReport
where
    F: Fetch<Response = Vec<u8>>,
{
    let mut report = DownloadReport {
        article_index,
        total: article.image_count(),
        ..DownloadReport::default()
    };

    let mut sections: Vec<_> = article.sections.iter().filter(|s| !s.images.is_empty()).collect();
    sections.sort_by_key(|s| s.section_id);

    for section in sections {
        debug!(section_id = section.section_id, title = %section.section_title, "Processing section");
        for (i, url) in section.images.iter().enumerate() {
            let path = image_path(images_root, article_index, section.section_id, i + 1);
            if non_empty_file(&path) {
                debug!(path = %path.display(), "Image already downloaded");
                report.skipped += 1;
                continue;
            }
            match save_image(fetcher, url, &path).await {
                Ok(()) => {
                    info!(%url, path = %path.display(), "Downloaded image");
                    report.downloaded += 1;
                }
                Err(e) => {
                    error!(%url, path = %path.display(), error = %e, "Image download failed");
                    report.failed += 1;
                }
            }
        }
    }

    report
}

/// Download images for every article in `articles_dir`.
///
/// Articles whose ledger row is already flagged and whose image folder is
/// non-empty are skipped outright. Afterwards the flag is set to whether
/// every image succeeded, which is also true for articles without images.
///
/// # Arguments
///
/// * `fetcher` - Byte fetcher for image URLs
/// * `ledger` - Link ledger holding the `images_downloaded` flags
/// * `articles_dir` - Directory of stored article JSON files
/// * `images_root` - Root under which `article_{index}/` folders are created
///
/// # Returns
///
/// One [`DownloadReport`] per article visited, in file order.
#[instrument(level = "info", skip_all, fields(articles_dir = %articles_dir.display()))]
pub async fn download_all<F>(
    fetcher: &F,
    ledger: &Ledger,
    articles_dir: &Path,
    images_root: &Path,
) -> Result<Vec<DownloadReport>>
where
    F: Fetch<Response = Vec<u8>>,
{
    fs::create_dir_all(images_root).await?;
    let files = json::article_files(articles_dir).await?;
    if files.is_empty() {
        warn!("No article JSON files found");
        return Ok(Vec::new());
    }
    info!(articles = files.len(), "Downloading article images");

    let mut reports = Vec::new();
    for file in &files {
        let Some(index) = json::article_index(file) else {
            warn!(path = %file.display(), "Article file has no index prefix; skipping");
            continue;
        };
        let article = match json::read_article(file).await {
            Ok(article) => article,
            Err(e) => {
                error!(path = %file.display(), error = %e, "Cannot read article");
                continue;
            }
        };

        let row = match ledger.find_by_url(&article.url) {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "Cannot read ledger");
                None
            }
        };
        let flagged = row.as_ref().is_some_and(|r| r.images_downloaded);
        if flagged && dir_has_entries(&article_image_dir(images_root, index)) {
            debug!(index, "Images already downloaded; skipping article");
            reports.push(DownloadReport {
                article_index: index,
                total: article.image_count(),
                already_done: true,
                ..DownloadReport::default()
            });
            continue;
        }

        let report = download_article_images(fetcher, &article, index, images_root).await;
        info!(
            index,
            total = report.total,
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "Article images processed"
        );

        if row.is_none() {
            warn!(url = %article.url, "Article has no ledger row; flag not updated");
        } else if let Err(e) = ledger.set_images_downloaded(&article.url, report.all_succeeded()) {
            error!(url = %article.url, error = %e, "Failed to update ledger image flag");
        }
        reports.push(report);
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{Paragraph, Section};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Serves fake image bytes, failing for URLs listed in `broken`.
    #[derive(Default)]
    struct FakeImages {
        broken: Mutex<HashSet<String>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeImages {
        fn requests(&self) -> usize {
            self.requested.lock().unwrap().len()
        }
    }

    impl Fetch for FakeImages {
        type Response = Vec<u8>;

        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            if self.broken.lock().unwrap().contains(url) {
                return Err(PipelineError::Status {
                    status: 500,
                    url: url.to_string(),
                });
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn section(id: u32, images: &[&str]) -> Section {
        Section {
            section_id: id,
            section_title: format!("S{id}"),
            section_level: 2,
            paragraphs: vec![Paragraph::from("text")],
            images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn article(url: &str, sections: Vec<Section>) -> Article {
        Article {
            title: "T".to_string(),
            url: url.to_string(),
            published_date: String::new(),
            author: String::new(),
            scraped_date: String::new(),
            sections,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: Ledger,
        articles: PathBuf,
        images: PathBuf,
    }

    async fn fixture(articles: Vec<Article>) -> Fixture {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("links.csv"));
        let articles_dir = dir.path().join("articles");
        let links: Vec<_> = articles
            .iter()
            .map(|a| (a.title.clone(), a.url.clone()))
            .collect();
        ledger.merge_links(&links).unwrap();
        for a in &articles {
            json::write_article(&articles_dir, a).await.unwrap();
        }
        Fixture {
            images: dir.path().join("images"),
            articles: articles_dir,
            ledger,
            _dir: dir,
        }
    }

    #[test]
    fn test_image_paths() {
        let root = Path::new("images");
        assert_eq!(image_path(root, 3, 1, 1), Path::new("images/article_3/image_1.jpg"));
        assert_eq!(image_path(root, 3, 1, 2), Path::new("images/article_3/image_1.2.jpg"));
        assert_eq!(image_path(root, 0, 4, 3), Path::new("images/article_0/image_4.3.jpg"));
    }

    #[tokio::test]
    async fn test_second_run_downloads_nothing() {
        let a = article(
            "https://e.com/a",
            vec![section(1, &["https://e.com/1.png", "https://e.com/2.png"]), section(2, &["https://e.com/3.png"])],
        );
        let fx = fixture(vec![a]).await;
        let fetcher = FakeImages::default();

        let first = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert_eq!(first[0].downloaded, 3);
        assert_eq!(fetcher.requests(), 3);
        assert!(fx.ledger.find_by_url("https://e.com/a").unwrap().unwrap().images_downloaded);

        let second = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert!(second[0].already_done);
        assert_eq!(fetcher.requests(), 3);

        let files = std::fs::read_dir(article_image_dir(&fx.images, 0)).unwrap().count();
        assert_eq!(files, 3);
    }

    #[tokio::test]
    async fn test_partial_failure_retries_only_missing_images() {
        let a = article(
            "https://e.com/a",
            vec![section(1, &["https://e.com/ok.png", "https://e.com/bad.png"])],
        );
        let fx = fixture(vec![a]).await;
        let fetcher = FakeImages::default();
        fetcher.broken.lock().unwrap().insert("https://e.com/bad.png".to_string());

        let first = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert_eq!((first[0].downloaded, first[0].failed), (1, 1));
        assert!(!fx.ledger.find_by_url("https://e.com/a").unwrap().unwrap().images_downloaded);

        fetcher.broken.lock().unwrap().clear();
        let second = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert_eq!((second[0].downloaded, second[0].skipped), (1, 1));
        assert_eq!(
            fetcher.requested.lock().unwrap().as_slice(),
            ["https://e.com/ok.png", "https://e.com/bad.png", "https://e.com/bad.png"]
        );
        assert!(fx.ledger.find_by_url("https://e.com/a").unwrap().unwrap().images_downloaded);
    }

    #[tokio::test]
    async fn test_article_without_images_is_flagged() {
        let fx = fixture(vec![article("https://e.com/plain", vec![section(1, &[])])]).await;
        let fetcher = FakeImages::default();

        let reports = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert_eq!(reports[0].total, 0);
        assert_eq!(fetcher.requests(), 0);
        assert!(fx.ledger.find_by_url("https://e.com/plain").unwrap().unwrap().images_downloaded);
    }

    #[tokio::test]
    async fn test_flag_with_empty_folder_is_rechecked() {
        let a = article("https://e.com/a", vec![section(1, &["https://e.com/1.png"])]);
        let fx = fixture(vec![a]).await;
        fx.ledger.set_images_downloaded("https://e.com/a", true).unwrap();
        let fetcher = FakeImages::default();

        let reports = download_all(&fetcher, &fx.ledger, &fx.articles, &fx.images).await.unwrap();
        assert!(!reports[0].already_done);
        assert_eq!(reports[0].downloaded, 1);
    }

    #[tokio::test]
    async fn test_empty_placeholder_file_is_refetched() {
        let dir = tempdir().unwrap();
        let a = article("https://e.com/a", vec![section(2, &["https://e.com/1.png"])]);
        let target = image_path(dir.path(), 5, 2, 1);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"").unwrap();

        let fetcher = FakeImages::default();
        let report = download_article_images(&fetcher, &a, 5, dir.path()).await;
        assert_eq!(report.downloaded, 1);
        assert_eq!(std::fs::read(&target).unwrap(), b"https://e.com/1.png");
    }
}
