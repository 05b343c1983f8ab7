//! Small helpers for logging, slugs and output directories.

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Longest slug kept in an article filename.
const MAX_SLUG_CHARS: usize = 60;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and the number
/// of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Convert a title to a URL-friendly slug.
///
/// Lowercases the text, removes special characters and replaces spaces
/// with hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("Test-Article!"), "test-article");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Slug safe to embed in an article filename.
///
/// Never contains `_`, which separates the index from the slug, and is
/// capped so very long titles still give short paths.
pub fn file_slug(title: &str) -> String {
    let slug: String = slugify_title(title).chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// True when `path` is a directory holding at least one entry.
pub fn dir_has_entries(path: &Path) -> bool {
    stdfs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// True when `path` is a file with at least one byte.
pub fn non_empty_file(path: &Path) -> bool {
    stdfs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let result = truncate_for_log("ééééé", 2);
        assert_eq!(result, "éé…(+6 bytes)");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Hello World"), "hello-world");
        assert_eq!(slugify_title("Test-Article!"), "test-article");
        assert_eq!(slugify_title("Special@#$Characters"), "specialcharacters");
        assert_eq!(slugify_title("snake_case: title/part"), "snakecase-titlepart");
    }

    #[test]
    fn test_file_slug() {
        assert_eq!(file_slug("  "), "untitled");
        assert_eq!(file_slug("!!!"), "untitled");
        assert!(file_slug(&"word ".repeat(40)).chars().count() <= 60);
        assert!(!file_slug("a_b c").contains('_'));
    }

    #[test]
    fn test_file_predicates() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!dir_has_entries(dir.path()));
        assert!(!dir_has_entries(&dir.path().join("missing")));

        let empty = dir.path().join("empty.jpg");
        stdfs::write(&empty, b"").unwrap();
        assert!(!non_empty_file(&empty));
        assert!(dir_has_entries(dir.path()));

        let full = dir.path().join("full.jpg");
        stdfs::write(&full, b"jpeg").unwrap();
        assert!(non_empty_file(&full));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_path() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!dir_has_entries(&nested));
    }
}
