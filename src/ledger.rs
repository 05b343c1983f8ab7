//! The CSV ledger of discovered article links.
//!
//! The ledger is always read and rewritten wholesale. Every mutation goes
//! through [`Ledger::update`], which re-reads the latest copy from disk,
//! applies the change and writes the whole file back, so a crash can only
//! lose the row being processed at that moment.

use crate::error::Result;
use crate::models::LinkRecord;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row. A missing file is an empty ledger.
    pub fn load(&self) -> Result<Vec<LinkRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Ledger does not exist yet");
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let rows = reader
            .deserialize::<LinkRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Overwrite the ledger with `rows`, creating parent directories.
    pub fn save(&self, rows: &[LinkRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Re-read, mutate and rewrite the ledger in one step.
    pub fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<LinkRecord>) -> T,
    {
        let mut rows = self.load()?;
        let out = f(&mut rows);
        self.save(&rows)?;
        Ok(out)
    }

    /// Append unseen `(title, url)` pairs as unchecked rows.
    ///
    /// Duplicates by `(title, url)` are dropped, keeping the first
    /// occurrence, so an existing row keeps its flags.
    ///
    /// # Arguments
    ///
    /// * `links` - Discovered `(title, url)` pairs in page order
    ///
    /// # Returns
    ///
    /// The number of rows added to the ledger.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), discovered = links.len()))]
    pub fn merge_links(&self, links: &[(String, String)]) -> Result<usize> {
        self.update(|rows| {
            let before = rows.len();
            let merged = rows
                .drain(..)
                .chain(links.iter().map(|(t, u)| LinkRecord::new(t.clone(), u.clone())))
                .unique_by(|r| (r.title.clone(), r.url.clone()))
                .collect::<Vec<_>>();
            *rows = merged;
            let added = rows.len().saturating_sub(before);
            info!(added, total = rows.len(), "Merged links into ledger");
            added
        })
    }

    /// Rows the article scraper still has to visit.
    pub fn unchecked(&self) -> Result<Vec<LinkRecord>> {
        Ok(self.load()?.into_iter().filter(|r| !r.checked).collect())
    }

    /// Flag the row keyed by `(title, url)` as scraped.
    pub fn mark_checked(&self, title: &str, url: &str) -> Result<bool> {
        self.update(|rows| {
            let mut found = false;
            for row in rows.iter_mut().filter(|r| r.key() == (title, url)) {
                row.checked = true;
                found = true;
            }
            if !found {
                warn!(%title, %url, "No ledger row to mark checked");
            }
            found
        })
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<LinkRecord>> {
        Ok(self.load()?.into_iter().find(|r| r.url == url))
    }

    /// Set `images_downloaded` on every row with this url.
    pub fn set_images_downloaded(&self, url: &str, value: bool) -> Result<bool> {
        self.update(|rows| {
            let mut found = false;
            for row in rows.iter_mut().filter(|r| r.url == url) {
                row.images_downloaded = value;
                found = true;
            }
            found
        })
    }
}
