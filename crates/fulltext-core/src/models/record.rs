use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::format::Format;

/// Why a record has to be (re-)extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateReason {
    NotExtractedBefore,
    MissingFullText,
    DifferingFullText,
    StaleContent,
    StaleMeta,
    ForceToExtract,
    ForceToSend,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotExtractedBefore => "NOT_EXTRACTED_BEFORE",
            Self::MissingFullText => "MISSING_FULL_TEXT",
            Self::DifferingFullText => "DIFFERING_FULL_TEXT",
            Self::StaleContent => "STALE_CONTENT",
            Self::StaleMeta => "STALE_META",
            Self::ForceToExtract => "FORCE_TO_EXTRACT",
            Self::ForceToSend => "FORCE_TO_SEND",
        }
    }

    /// Directives set by the caller rather than derived by the staleness check.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::ForceToExtract | Self::ForceToSend)
    }
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extraction request. Created fresh for every processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: String,
    /// Primary content first, auxiliary files (HTML tables, ...) after it.
    pub source_locations: Vec<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_reason: Option<UpdateReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Build a record from the raw source field of a links file, which may
    /// list several comma-separated paths.
    pub fn new(
        identifier: impl Into<String>,
        source: &str,
        provider: impl Into<String>,
    ) -> Self {
        Self::with_sources(identifier, split_source_locations(source), provider)
    }

    pub fn with_sources(
        identifier: impl Into<String>,
        source_locations: Vec<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            source_locations,
            provider: provider.into(),
            format: None,
            update_reason: None,
            extracted_at: None,
        }
    }

    pub fn with_reason(mut self, reason: UpdateReason) -> Self {
        self.update_reason = Some(reason);
        self
    }

    pub fn primary_source(&self) -> Option<&str> {
        self.source_locations.first().map(String::as_str)
    }

    pub fn auxiliary_sources(&self) -> &[String] {
        self.source_locations.get(1..).unwrap_or(&[])
    }

    /// The format recorded on the record, or the one implied by its primary source.
    pub fn effective_format(&self) -> Option<Format> {
        self.format
            .clone()
            .or_else(|| self.primary_source().map(Format::from_source))
    }
}

/// Split a source field into its locations.
///
/// A new location starts at a comma that is immediately followed by `/` and
/// not preceded by another comma, so commas inside a path are kept.
pub fn split_source_locations(source: &str) -> Vec<String> {
    let mut locations = Vec::new();
    let mut current = String::new();
    let mut chars = source.chars().peekable();
    let mut previous: Option<char> = None;

    while let Some(c) = chars.next() {
        let splits = c == ','
            && previous != Some(',')
            && !current.is_empty()
            && chars.peek() == Some(&'/');
        if splits {
            locations.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        previous = Some(c);
    }

    if !current.is_empty() {
        locations.push(current);
    }

    locations
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Text and metadata produced by one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub full_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgements: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset_ids: Vec<String>,
    /// Facility identifiers declared in the document markup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facility_ids: Vec<String>,
    /// TEI document returned by the structured PDF service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_text: Option<String>,
    /// Facility names recognised in the texts, stored with the meta document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_mentions: Option<FacilityMentions>,
}

impl ExtractedContent {
    pub fn from_text(full_text: impl Into<String>) -> Self {
        Self {
            full_text: full_text.into(),
            ..Default::default()
        }
    }

    /// Fold the content of another source file of the same record into this one.
    pub fn merge(&mut self, other: ExtractedContent) {
        join_text(&mut self.full_text, other.full_text);
        self.acknowledgements = match (self.acknowledgements.take(), other.acknowledgements) {
            (Some(mut a), Some(b)) => {
                join_text(&mut a, b);
                Some(a)
            }
            (a, b) => a.or(b),
        };
        self.dataset_ids.extend(other.dataset_ids);
        self.facility_ids.extend(other.facility_ids);
        if self.structured_text.is_none() {
            self.structured_text = other.structured_text;
        }
        if self.facility_mentions.is_none() {
            self.facility_mentions = other.facility_mentions;
        }
    }
}

fn join_text(target: &mut String, addition: String) {
    if addition.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(&addition);
}

/// Facility names recognised in an artifact's texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityMentions {
    pub acknowledgements: Vec<String>,
    pub full_text: Vec<String>,
}

impl FacilityMentions {
    pub fn is_empty(&self) -> bool {
        self.acknowledgements.is_empty() && self.full_text.is_empty()
    }
}
