//! Plain text and OCR output: no structure, normalization only.

use std::path::Path;

use fulltext_core::ExtractedContent;

use crate::error::{ExtractError, Result};
use crate::normalize::TextNormalizer;

pub fn extract_file(path: &Path, normalizer: &TextNormalizer) -> Result<ExtractedContent> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(ExtractedContent::from_text(normalizer.normalize(&text)))
}
