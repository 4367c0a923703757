use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::addressing::SidecarField;
use crate::models::format::Format;
use crate::models::record::{ExtractedContent, FacilityMentions, Record, UpdateReason};

/// The `meta.json` document stored next to an artifact's sidecars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    #[serde(alias = "bibcode")]
    pub identifier: String,
    /// Primary source the stored text was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ft_source: Option<String>,
    #[serde(default)]
    pub source_locations: Vec<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default, alias = "UPDATE", skip_serializing_if = "Option::is_none")]
    pub update_reason: Option<UpdateReason>,
    #[serde(default, alias = "file_format", skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(default, alias = "index_date", skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facility: Vec<String>,
    #[serde(
        default,
        rename = "facility-ack",
        skip_serializing_if = "Option::is_none"
    )]
    pub facility_ack: Option<Vec<String>>,
    #[serde(
        default,
        rename = "facility-ft",
        skip_serializing_if = "Option::is_none"
    )]
    pub facility_ft: Option<Vec<String>>,
    #[serde(default)]
    pub sidecars: Vec<SidecarField>,
}

impl ArtifactMeta {
    /// Build the meta document for a freshly extracted record.
    pub fn from_record(record: &Record, content: &ExtractedContent) -> Self {
        let mut sidecars = vec![SidecarField::FullText];
        if content
            .acknowledgements
            .as_deref()
            .is_some_and(|a| !a.is_empty())
        {
            sidecars.push(SidecarField::Acknowledgements);
        }
        if content
            .structured_text
            .as_deref()
            .is_some_and(|s| !s.is_empty())
        {
            sidecars.push(SidecarField::StructuredText);
        }

        Self {
            identifier: record.identifier.clone(),
            ft_source: record.primary_source().map(str::to_string),
            source_locations: record.source_locations.clone(),
            provider: record.provider.clone(),
            update_reason: record.update_reason,
            format: record.effective_format(),
            extracted_at: record.extracted_at,
            dataset: content.dataset_ids.clone(),
            facility: content.facility_ids.clone(),
            facility_ack: content
                .facility_mentions
                .as_ref()
                .map(|m| m.acknowledgements.clone())
                .filter(|names| !names.is_empty()),
            facility_ft: content
                .facility_mentions
                .as_ref()
                .map(|m| m.full_text.clone())
                .filter(|names| !names.is_empty()),
            sidecars,
        }
    }

    pub fn has_sidecar(&self, field: SidecarField) -> bool {
        self.sidecars.contains(&field)
    }
}

/// A stored artifact: its meta document plus the decompressed sidecar texts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_text: Option<String>,
}

impl Artifact {
    pub fn sidecar(&self, field: SidecarField) -> Option<&str> {
        match field {
            SidecarField::FullText => Some(&self.full_text),
            SidecarField::Acknowledgements => self.acknowledgements.as_deref(),
            SidecarField::StructuredText => self.structured_text.as_deref(),
        }
    }

    /// Rebuild the extraction result this artifact was written from.
    pub fn to_content(&self) -> ExtractedContent {
        let recognized = self.meta.facility_ack.is_some() || self.meta.facility_ft.is_some();
        ExtractedContent {
            full_text: self.full_text.clone(),
            acknowledgements: self.acknowledgements.clone(),
            dataset_ids: self.meta.dataset.clone(),
            facility_ids: self.meta.facility.clone(),
            structured_text: self.structured_text.clone(),
            facility_mentions: recognized.then(|| FacilityMentions {
                acknowledgements: self.meta.facility_ack.clone().unwrap_or_default(),
                full_text: self.meta.facility_ft.clone().unwrap_or_default(),
            }),
        }
    }
}
