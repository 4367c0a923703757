//! Per-record orchestration: decide, extract, write, annotate.

use std::sync::Arc;
use std::time::Duration;

use fulltext_core::{
    ArtifactStore, FulltextConfig, Record, ShardLayout, StalenessEngine, UpdateReason,
    WriteOutcome,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::dispatch::{ExtractorDispatch, ExtractorSettings};
use crate::error::Result;
use crate::facilities::{FacilityRecognizer, GazetteerRecognizer, recognize_content};
use crate::rules::RuleSet;
use crate::structured::StructuredPdfClient;

const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    UpToDate,
    /// Re-delivery of an artifact already on disk, nothing extracted.
    Resent { path: String },
    Extracted { reason: UpdateReason, path: String, written: bool },
}

impl RecordOutcome {
    fn extracted(reason: UpdateReason, outcome: WriteOutcome) -> Self {
        let written = matches!(outcome, WriteOutcome::Written { .. });
        Self::Extracted {
            reason,
            path: outcome.path().display().to_string(),
            written,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRecord {
    pub identifier: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    /// Records extracted or re-sent, ready for delivery downstream.
    pub ready: Vec<ProcessedRecord>,
    pub up_to_date: Vec<String>,
    /// Identifier and error message of every record that failed.
    pub failed: Vec<(String, String)>,
}

pub struct Pipeline {
    engine: StalenessEngine,
    store: ArtifactStore,
    dispatch: ExtractorDispatch,
    structured: Option<StructuredPdfClient>,
    recognizer: Option<Arc<dyn FacilityRecognizer>>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(layout: ShardLayout, dispatch: ExtractorDispatch) -> Self {
        Self {
            engine: StalenessEngine::new(layout.clone()),
            store: ArtifactStore::new(layout),
            dispatch,
            structured: None,
            recognizer: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Build every component from configuration.
    pub fn from_config(config: &FulltextConfig) -> Result<Self> {
        let rules = RuleSet::load_or_builtin(config.rules_path().as_deref())?;
        let dispatch = ExtractorDispatch::new(rules, ExtractorSettings::from_config(config))?;
        let mut pipeline =
            Self::new(config.layout(), dispatch).with_concurrency(config.extraction.concurrency);

        if let Some(service) = &config.structured_pdf {
            pipeline = pipeline.with_structured_pdf(StructuredPdfClient::new(
                service.url.clone(),
                Duration::from_secs(service.timeout_secs),
            )?);
        }
        if config.facilities.enabled {
            pipeline = pipeline.with_facility_recognizer(Arc::new(GazetteerRecognizer::new(
                config.facilities.names.iter().cloned(),
            )?));
        }
        Ok(pipeline)
    }

    pub fn with_structured_pdf(mut self, client: StructuredPdfClient) -> Self {
        self.structured = Some(client);
        self
    }

    pub fn with_facility_recognizer(mut self, recognizer: Arc<dyn FacilityRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn engine(&self) -> &StalenessEngine {
        &self.engine
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub async fn process(&self, record: Record) -> Result<RecordOutcome> {
        let engine = self.engine.clone();
        let (record, reason) = tokio::task::spawn_blocking(move || {
            let mut record = record;
            let reason = engine.decide(&mut record);
            (record, reason)
        })
        .await?;
        let Some(reason) = reason? else {
            return Ok(RecordOutcome::UpToDate);
        };

        if reason == UpdateReason::ForceToSend {
            let store = self.store.clone();
            let identifier = record.identifier.clone();
            let existing =
                tokio::task::spawn_blocking(move || store.read_artifact(&identifier)).await??;
            if let Some(artifact) = existing
                && !artifact.full_text.is_empty()
            {
                let path = self.store.layout().artifact_dir(&record.identifier)?;
                info!(identifier = %record.identifier, "re-sending stored artifact");
                return Ok(RecordOutcome::Resent {
                    path: path.display().to_string(),
                });
            }
        }

        let mut content = self.dispatch.extract(&record).await?;

        if let Some(client) = &self.structured
            && record.format.as_ref().is_some_and(|f| f.is_pdf())
            && let Some(pdf) = record.primary_source()
        {
            let tei = client.convert(std::path::Path::new(pdf)).await;
            let tei = self.dispatch.normalizer().normalize(&tei);
            content.structured_text = (!tei.is_empty()).then_some(tei);
        }

        // Facilities go into the same meta write as the texts.
        if let Some(recognizer) = &self.recognizer {
            let mentions = recognize_content(recognizer.as_ref(), &content);
            if mentions.is_empty() {
                info!(identifier = %record.identifier, "no facilities found");
            }
            content.facility_mentions = Some(mentions);
        }

        let store = self.store.clone();
        let outcome =
            tokio::task::spawn_blocking(move || store.write_artifact(&record, &content)).await??;

        Ok(RecordOutcome::extracted(reason, outcome))
    }

    /// Process records concurrently. A failing record is reported and never
    /// stops the others.
    pub async fn process_batch(&self, records: Vec<Record>) -> BatchReport {
        let results: Vec<_> = stream::iter(records.into_iter().map(|record| async move {
            let identifier = record.identifier.clone();
            (identifier, self.process(record).await)
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut report = BatchReport::default();
        for (identifier, result) in results {
            match result {
                Ok(RecordOutcome::UpToDate) => report.up_to_date.push(identifier),
                Ok(outcome) => report.ready.push(ProcessedRecord {
                    identifier,
                    outcome,
                }),
                Err(e) => {
                    warn!(%identifier, error = %e, "record failed");
                    report.failed.push((identifier, e.to_string()));
                }
            }
        }
        info!(
            ready = report.ready.len(),
            up_to_date = report.up_to_date.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        report
    }
}
