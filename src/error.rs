//! Error type shared by every pipeline stage.
//!
//! Stages return [`Result`] and the batch loops decide per item whether an
//! error is logged and skipped or propagated. Only configuration errors are
//! meant to stop the binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("no content: {0}")]
    NoContent(String),

    #[error("no article index left in {0}")]
    IndexExhausted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model server error: {0}")]
    ModelServer(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
