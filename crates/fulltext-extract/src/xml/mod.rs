//! XML extraction: generic publisher XML, Elsevier (namespaced) and TEI.

mod tree;

use std::path::Path;

use fulltext_core::ExtractedContent;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub use tree::{NodeId, XmlTree};

use crate::error::{ExtractError, Result};
use crate::normalize::TextNormalizer;
use crate::rules::{FieldKind, FieldRule, FieldTarget, XmlProfile};

/// Extract the fields of `profile` from an XML file on disk.
pub fn extract_file(
    path: &Path,
    profile: &XmlProfile,
    normalizer: &TextNormalizer,
) -> Result<ExtractedContent> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    let text = decode(bytes);
    extract_str(path, &text, profile, normalizer)
}

/// Extract from an already decoded document. `origin` is used in errors only.
pub fn extract_str(
    origin: &Path,
    text: &str,
    profile: &XmlProfile,
    normalizer: &TextNormalizer,
) -> Result<ExtractedContent> {
    let text = unwrap_body_comment(text);
    let mut tree = XmlTree::parse(&text, profile.names).map_err(|message| {
        ExtractError::XmlParse {
            path: origin.to_path_buf(),
            message,
        }
    })?;

    tree.strip(&profile.strip);
    for selector in &profile.detach {
        tree.detach(selector);
    }

    let mut content = ExtractedContent::default();
    for rule in &profile.fields {
        match rule.kind {
            FieldKind::String => {
                let value = string_field(&tree, rule, normalizer);
                if value.is_none() && rule.required {
                    return Err(ExtractError::MissingField {
                        field: rule.target.name().to_string(),
                        path: origin.to_path_buf(),
                    });
                }
                match rule.target {
                    FieldTarget::FullText => content.full_text = value.unwrap_or_default(),
                    FieldTarget::Acknowledgements => content.acknowledgements = value,
                    _ => {}
                }
            }
            FieldKind::List => {
                let values = list_field(&tree, rule, normalizer);
                if values.is_empty() && rule.required {
                    return Err(ExtractError::MissingField {
                        field: rule.target.name().to_string(),
                        path: origin.to_path_buf(),
                    });
                }
                match rule.target {
                    FieldTarget::Dataset => content.dataset_ids = values,
                    FieldTarget::Facility => content.facility_ids = values,
                    _ => {}
                }
            }
        }
    }

    debug!(
        path = %origin.display(),
        chars = content.full_text.len(),
        datasets = content.dataset_ids.len(),
        "XML extracted"
    );
    Ok(content)
}

fn string_field(tree: &XmlTree, rule: &FieldRule, normalizer: &TextNormalizer) -> Option<String> {
    let mut found: Vec<String> = Vec::new();
    for selector in &rule.selectors {
        let Some(&first) = tree.select(selector).first() else {
            continue;
        };
        let text = normalizer.normalize(&tree.text(first));
        if text.is_empty() {
            continue;
        }
        if !rule.join {
            return Some(text);
        }
        // An appendix inside the body matches twice; keep it once.
        if !found.iter().any(|f| f.contains(&text)) {
            found.push(text);
        }
    }
    (!found.is_empty()).then(|| found.join("\n"))
}

fn list_field(tree: &XmlTree, rule: &FieldRule, normalizer: &TextNormalizer) -> Vec<String> {
    let Some(attribute) = rule.attribute.as_deref() else {
        return Vec::new();
    };
    for selector in &rule.selectors {
        let values: Vec<String> = tree
            .select(selector)
            .into_iter()
            .filter_map(|node| tree.attribute(node, attribute))
            .map(|value| normalizer.normalize(value))
            .filter(|value| !value.is_empty())
            .collect();
        if !values.is_empty() {
            return values;
        }
    }
    Vec::new()
}

/// UTF-8 when valid, otherwise every byte is read as Latin-1.
pub fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Some providers wrap the article body in `<!-- body ... endbody -->`.
fn unwrap_body_comment(text: &str) -> std::borrow::Cow<'_, str> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)<!--\s*body\s*(.*)\s*endbody\s*-->").unwrap());
    RE.replace_all(text, "$1")
}
