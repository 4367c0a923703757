//! Decides whether a record's stored artifact must be (re)built.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::addressing::ShardLayout;
use crate::error::{FulltextError, Result};
use crate::models::{Format, Record, UpdateReason, is_remote};

/// The subset of a stored meta document the staleness check relies on.
/// Every field is optional so a damaged document still parses far enough
/// to be classified.
#[derive(Debug, Deserialize)]
struct PriorMeta {
    #[serde(default, alias = "bibcode")]
    identifier: Option<String>,
    #[serde(default, alias = "index_date")]
    extracted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ft_source: Option<String>,
}

/// Records that need work after a batch check, split by sub-queue.
#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub standard: Vec<Record>,
    /// PDF records go to their own, slower extraction queue.
    pub pdf: Vec<Record>,
    pub up_to_date: Vec<String>,
    pub failed: Vec<(String, FulltextError)>,
}

impl CheckOutcome {
    pub fn pending(&self) -> usize {
        self.standard.len() + self.pdf.len()
    }
}

#[derive(Debug, Clone)]
pub struct StalenessEngine {
    layout: ShardLayout,
}

impl StalenessEngine {
    pub fn new(layout: ShardLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Classify a record against its stored artifact.
    ///
    /// Stamps `format`, `extracted_at` and `update_reason` on the record.
    /// Returns `None` when the stored artifact is current.
    pub fn decide(&self, record: &mut Record) -> Result<Option<UpdateReason>> {
        let primary = record
            .primary_source()
            .map(str::to_string)
            .ok_or_else(|| FulltextError::MissingSource(record.identifier.clone()))?;

        let reason = self.classify(record, &primary)?;

        record.format = Some(Format::from_source(&primary));
        record.extracted_at = Some(Utc::now());
        record.update_reason = reason;

        match reason {
            Some(reason) => info!(
                identifier = %record.identifier,
                %reason,
                "record needs extraction"
            ),
            None => debug!(identifier = %record.identifier, "artifact is up to date"),
        }
        Ok(reason)
    }

    fn classify(&self, record: &Record, primary: &str) -> Result<Option<UpdateReason>> {
        if let Some(reason) = record.update_reason
            && reason.is_forced()
        {
            return Ok(Some(reason));
        }

        let meta_path = self.layout.meta_path(&record.identifier)?;
        let raw = match std::fs::read(&meta_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %meta_path.display(), "no existing meta file");
                return Ok(Some(UpdateReason::NotExtractedBefore));
            }
            Err(e) => return Err(FulltextError::io_at(meta_path, e)),
        };

        let prior = match serde_json::from_slice::<PriorMeta>(&raw) {
            Ok(prior) if prior.identifier.is_some() && prior.extracted_at.is_some() => prior,
            Ok(_) => {
                warn!(path = %meta_path.display(), "meta file lacks identifier or timestamp");
                return Ok(Some(UpdateReason::StaleMeta));
            }
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "malformed meta file");
                return Ok(Some(UpdateReason::StaleMeta));
            }
        };

        if prior.identifier.as_deref() != Some(record.identifier.as_str()) {
            warn!(
                path = %meta_path.display(),
                stored = prior.identifier.as_deref().unwrap_or_default(),
                identifier = %record.identifier,
                "meta file belongs to another identifier"
            );
            return Ok(Some(UpdateReason::StaleMeta));
        }

        let Some(stored_source) = prior.ft_source else {
            return Ok(Some(UpdateReason::MissingFullText));
        };
        if stored_source != primary {
            return Ok(Some(UpdateReason::DifferingFullText));
        }

        if is_remote(primary) {
            return Ok(None);
        }

        let source_mtime = modified_at(Path::new(primary)).map_err(|e| match e {
            FulltextError::IoAt { path, source } if source.kind() == ErrorKind::NotFound => {
                FulltextError::SourceNotFound { path }
            }
            other => other,
        })?;
        let meta_mtime = modified_at(&meta_path)?;
        debug!(%source_mtime, %meta_mtime, "comparing modification times");

        if source_mtime > meta_mtime {
            return Ok(Some(UpdateReason::StaleContent));
        }
        Ok(None)
    }

    /// Check many records. A failing record never stops its siblings.
    pub fn decide_batch(&self, records: impl IntoIterator<Item = Record>) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();
        for mut record in records {
            match self.decide(&mut record) {
                Ok(Some(_)) if record.format.as_ref().is_some_and(Format::is_pdf) => {
                    outcome.pdf.push(record)
                }
                Ok(Some(_)) => outcome.standard.push(record),
                Ok(None) => outcome.up_to_date.push(record.identifier),
                Err(e) => {
                    warn!(identifier = %record.identifier, error = %e, "staleness check failed");
                    outcome.failed.push((record.identifier, e));
                }
            }
        }
        outcome
    }
}

fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).map_err(|e| FulltextError::io_at(path, e))?;
    let modified = metadata.modified().map_err(|e| FulltextError::io_at(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}
