use std::path::PathBuf;

use fulltext_core::FulltextError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML parse error in {}: {message}", path.display())]
    XmlParse { path: PathBuf, message: String },

    #[error("required field {field} not found in {}", path.display())]
    MissingField { field: String, path: PathBuf },

    #[error("invalid extraction rule: {0}")]
    InvalidRule(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("{program} exited with {status}: {stderr}")]
    ExternalProcess {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("artifact {identifier} was rewritten while being annotated")]
    ConcurrentUpdate { identifier: String },

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Core(#[from] FulltextError),
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
