//! Files the pipeline writes and reads back.
//!
//! - [`json`]: one article document per file, named by a resumable index
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── raw/google_ai_links.csv          # link ledger
//! └── processed/
//!     ├── google_articles/0_slug.json  # article documents
//!     └── read_status.json             # viewer read flags
//! images/
//! └── article_0/image_1.jpg            # downloaded images
//! ```

pub mod json;
