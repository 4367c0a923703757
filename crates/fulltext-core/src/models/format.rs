use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source document format. Drives extractor dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Format {
    Txt,
    Ocr,
    Xml,
    TeiXml,
    Html,
    Http,
    Pdf,
    /// An extension no extractor handles. Kept verbatim for error reporting.
    Other(String),
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Format {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Txt => "txt",
            Self::Ocr => "ocr",
            Self::Xml => "xml",
            Self::TeiXml => "teixml",
            Self::Html => "html",
            Self::Http => "http",
            Self::Pdf => "pdf",
            Self::Other(ext) => ext,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" => Self::Txt,
            "ocr" => Self::Ocr,
            "xml" => Self::Xml,
            "teixml" => Self::TeiXml,
            "html" | "htm" => Self::Html,
            "http" => Self::Http,
            "pdf" => Self::Pdf,
            other => Self::Other(other.to_string()),
        }
    }

    /// Derive the format of a source location: its extension, or `Http` for a
    /// URL whose path carries none.
    pub fn from_source(source: &str) -> Self {
        let source = source.trim();
        if is_remote(source) {
            let path = source
                .split_once("://")
                .and_then(|(_, rest)| rest.split_once('/'))
                .map(|(_, path)| path)
                .unwrap_or("");
            let path = path.split(['?', '#']).next().unwrap_or("");
            return match Path::new(path).extension().and_then(|e| e.to_str()) {
                Some(ext) if !ext.is_empty() => Self::from_extension(ext),
                _ => Self::Http,
            };
        }

        match Path::new(source).extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => Self::Other(String::new()),
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, Self::Pdf)
    }
}

impl From<String> for Format {
    fn from(value: String) -> Self {
        Self::from_extension(&value)
    }
}

impl From<Format> for String {
    fn from(value: Format) -> Self {
        value.as_str().to_string()
    }
}

/// True for locations fetched over the network rather than read from disk.
pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
