//! Facility recognition over stored artifacts.

use fulltext_core::{ArtifactMeta, ArtifactStore, ExtractedContent, FacilityMentions};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use crate::error::{ExtractError, Result};

/// Finds facility names in free text. Implementations backed by a model
/// plug in here; [`GazetteerRecognizer`] is the bundled one.
pub trait FacilityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<String>;
}

/// Case-insensitive whole-word lookup of a fixed list of names.
pub struct GazetteerRecognizer {
    patterns: Vec<(String, Regex)>,
}

impl GazetteerRecognizer {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut patterns = Vec::new();
        for name in names {
            let name = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let pattern = format!(r"\b{}\b", regex::escape(&name));
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ExtractError::InvalidRule(format!("facility {name:?}: {e}")))?;
            patterns.push((name, regex));
        }
        Ok(Self { patterns })
    }
}

impl FacilityRecognizer for GazetteerRecognizer {
    /// Configured names present in `text`, ordered by first occurrence.
    fn recognize(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, &str)> = self
            .patterns
            .iter()
            .filter_map(|(name, regex)| regex.find(text).map(|m| (m.start(), name.as_str())))
            .collect();
        found.sort_by_key(|(start, _)| *start);
        found.into_iter().map(|(_, name)| name.to_string()).collect()
    }
}

/// Recognise facilities in freshly extracted texts.
pub fn recognize_content(
    recognizer: &dyn FacilityRecognizer,
    content: &ExtractedContent,
) -> FacilityMentions {
    FacilityMentions {
        acknowledgements: content
            .acknowledgements
            .as_deref()
            .map(|text| dedup(recognizer.recognize(text)))
            .unwrap_or_default(),
        full_text: dedup(recognizer.recognize(&content.full_text)),
    }
}

/// Run recognition on a stored artifact and record the result in its meta
/// document. `Ok(None)` when the artifact does not exist.
///
/// Fails with [`ExtractError::ConcurrentUpdate`] when the artifact is
/// rewritten between reading it and storing the result.
pub fn identify_facilities(
    store: &ArtifactStore,
    recognizer: &dyn FacilityRecognizer,
    identifier: &str,
) -> Result<Option<FacilityMentions>> {
    let Some(artifact) = store.read_artifact(identifier)? else {
        debug!(identifier, "no artifact, skipping facility recognition");
        return Ok(None);
    };

    let mentions = recognize_content(recognizer, &artifact.to_content());
    if mentions.is_empty() {
        info!(identifier, "no facilities found");
    }
    record_mentions(store, &artifact.meta, &mentions)?;

    debug!(
        identifier,
        ack = mentions.acknowledgements.len(),
        full_text = mentions.full_text.len(),
        "facilities recorded"
    );
    Ok(Some(mentions))
}

/// Store `mentions` in the meta document read as `seen`, unless a newer
/// write replaced it meanwhile.
fn record_mentions(
    store: &ArtifactStore,
    seen: &ArtifactMeta,
    mentions: &FacilityMentions,
) -> Result<()> {
    if store.read_meta(&seen.identifier)?.as_ref() != Some(seen) {
        warn!(identifier = %seen.identifier, "artifact changed, not storing facilities");
        return Err(ExtractError::ConcurrentUpdate {
            identifier: seen.identifier.clone(),
        });
    }

    let mut meta = seen.clone();
    meta.facility_ack =
        (!mentions.acknowledgements.is_empty()).then(|| mentions.acknowledgements.clone());
    meta.facility_ft = (!mentions.full_text.is_empty()).then(|| mentions.full_text.clone());
    store.write_meta(&meta)?;
    Ok(())
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
