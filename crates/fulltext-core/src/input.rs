use std::path::Path;

use tracing::debug;

use crate::error::{FulltextError, Result};
use crate::models::{Record, UpdateReason};

/// Read a links file: one `bibcode<TAB>source<TAB>provider` record per line.
///
/// Runs of tabs count as one separator and blank lines are skipped. With
/// `force_extract` every record is stamped `FORCE_TO_EXTRACT`.
pub fn read_links_file(path: &Path, force_extract: bool) -> Result<Vec<Record>> {
    let contents = std::fs::read_to_string(path).map_err(|e| FulltextError::io_at(path, e))?;
    let records = parse_links(&contents, force_extract)?;
    debug!(path = %path.display(), count = records.len(), "links file read");
    Ok(records)
}

pub fn parse_links(contents: &str, force_extract: bool) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let fields: Vec<&str> = line
            .trim()
            .split('\t')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        match fields.as_slice() {
            [] => continue,
            [bibcode, source, provider, ..] => {
                let record = Record::new(*bibcode, source, *provider);
                records.push(if force_extract {
                    record.with_reason(UpdateReason::ForceToExtract)
                } else {
                    record
                });
            }
            short => {
                return Err(FulltextError::InvalidInput {
                    line: index + 1,
                    message: format!("expected 3 tab-separated fields, found {}", short.len()),
                });
            }
        }
    }
    Ok(records)
}
