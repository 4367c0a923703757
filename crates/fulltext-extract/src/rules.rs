//! Extraction rule tables.
//!
//! Rules are data, not code: a TOML document with one profile per XML flavour
//! plus the HTML markers. The bundled copy is compiled in; a deployment can
//! point `extraction.rules_path` at its own file.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ExtractError, Result};

const BUILTIN_RULES: &str = include_str!("rules.toml");

/// How element and attribute names are compared against selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatch {
    /// Namespace prefixes are ignored on both sides.
    Local,
    /// Selectors with a prefix must match the prefixed name exactly.
    Qualified,
}

/// `tag` or `tag[attr=value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSelector {
    pub tag: String,
    pub attribute: Option<(String, String)>,
}

impl XmlSelector {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || ExtractError::InvalidRule(format!("malformed selector {input:?}"));

        let (tag, attribute) = match input.split_once('[') {
            None => (input, None),
            Some((tag, rest)) => {
                let body = rest.strip_suffix(']').ok_or_else(invalid)?;
                let (name, value) = body.split_once('=').ok_or_else(invalid)?;
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                let name = name.trim();
                if name.is_empty() || value.is_empty() {
                    return Err(invalid());
                }
                (tag, Some((name.to_string(), value.to_string())))
            }
        };

        if tag.is_empty() || tag.contains(|c: char| c.is_whitespace() || "[]=/".contains(c)) {
            return Err(invalid());
        }
        Ok(Self {
            tag: tag.to_string(),
            attribute,
        })
    }
}

impl std::fmt::Display for XmlSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.attribute {
            Some((name, value)) => write!(f, "{}[{name}={value}]", self.tag),
            None => f.write_str(&self.tag),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    List,
}

/// Where a field's value ends up in the extraction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum FieldTarget {
    #[serde(rename = "fulltext")]
    FullText,
    #[serde(rename = "acknowledgements")]
    Acknowledgements,
    #[serde(rename = "dataset")]
    Dataset,
    #[serde(rename = "facility")]
    Facility,
}

impl FieldTarget {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullText => "fulltext",
            Self::Acknowledgements => "acknowledgements",
            Self::Dataset => "dataset",
            Self::Facility => "facility",
        }
    }

    fn kind(&self) -> FieldKind {
        match self {
            Self::FullText | Self::Acknowledgements => FieldKind::String,
            Self::Dataset | Self::Facility => FieldKind::List,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub target: FieldTarget,
    pub kind: FieldKind,
    pub selectors: Vec<XmlSelector>,
    /// Attribute collected by list fields.
    pub attribute: Option<String>,
    pub required: bool,
    /// Join the text of every selector that matches instead of stopping at
    /// the first one.
    pub join: bool,
}

#[derive(Debug, Clone)]
pub struct XmlProfile {
    pub names: NameMatch,
    pub strip: Vec<String>,
    pub detach: Vec<XmlSelector>,
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Clone)]
pub struct MarkerRule {
    pub selector: scraper::Selector,
    pub contains: String,
}

#[derive(Debug, Clone)]
pub struct HtmlRules {
    pub introduction: Vec<MarkerRule>,
    pub references: Vec<MarkerRule>,
    pub skip: Option<scraper::Selector>,
    pub table: scraper::Selector,
    pub table_link: scraper::Selector,
    pub table_link_attribute: String,
    pub table_name_pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub version: u32,
    pub xml: XmlProfile,
    pub xml_namespaced: XmlProfile,
    pub teixml: XmlProfile,
    pub html: HtmlRules,
}

// ─── On-disk shape ─────────────────────────────────────────

#[derive(Deserialize)]
struct RawRuleSet {
    #[serde(default)]
    version: u32,
    xml: RawProfile,
    xml_namespaced: RawProfile,
    teixml: RawProfile,
    html: RawHtml,
}

#[derive(Deserialize)]
struct RawProfile {
    names: NameMatch,
    #[serde(default)]
    strip: Vec<String>,
    #[serde(default)]
    detach: Vec<String>,
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: FieldTarget,
    kind: FieldKind,
    selectors: Vec<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    join: bool,
}

#[derive(Deserialize)]
struct RawMarker {
    selector: String,
    #[serde(default)]
    contains: String,
}

#[derive(Deserialize)]
struct RawHtml {
    introduction: Vec<RawMarker>,
    #[serde(default)]
    references: Vec<RawMarker>,
    #[serde(default)]
    skip: Option<String>,
    table: String,
    table_link: String,
    table_link_attribute: String,
    table_name_pattern: String,
}

// ─── Loading ───────────────────────────────────────────────

impl RuleSet {
    /// The rules shipped with this crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_RULES)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
        let rules = Self::from_toml(&contents)?;
        debug!(path = %path.display(), version = rules.version, "extraction rules loaded");
        Ok(rules)
    }

    /// The bundled rules, or the file at `path` when one is configured.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawRuleSet = toml::from_str(contents)
            .map_err(|e| ExtractError::InvalidRule(e.to_string()))?;
        Ok(Self {
            version: raw.version,
            xml: compile_profile("xml", raw.xml)?,
            xml_namespaced: compile_profile("xml_namespaced", raw.xml_namespaced)?,
            teixml: compile_profile("teixml", raw.teixml)?,
            html: compile_html(raw.html)?,
        })
    }
}

fn compile_profile(profile: &str, raw: RawProfile) -> Result<XmlProfile> {
    let detach = raw
        .detach
        .iter()
        .map(|s| XmlSelector::parse(s))
        .collect::<Result<Vec<_>>>()?;

    let mut fields = Vec::with_capacity(raw.fields.len());
    for field in raw.fields {
        if field.kind != field.name.kind() {
            return Err(ExtractError::InvalidRule(format!(
                "{profile}.{}: wrong kind {:?}",
                field.name.name(),
                field.kind
            )));
        }
        if field.kind == FieldKind::List && field.attribute.is_none() {
            return Err(ExtractError::InvalidRule(format!(
                "{profile}.{}: list fields need an attribute",
                field.name.name()
            )));
        }
        if field.selectors.is_empty() {
            return Err(ExtractError::InvalidRule(format!(
                "{profile}.{}: no selectors",
                field.name.name()
            )));
        }
        fields.push(FieldRule {
            target: field.name,
            kind: field.kind,
            selectors: field
                .selectors
                .iter()
                .map(|s| XmlSelector::parse(s))
                .collect::<Result<Vec<_>>>()?,
            attribute: field.attribute,
            required: field.required,
            join: field.join,
        });
    }

    Ok(XmlProfile {
        names: raw.names,
        strip: raw.strip,
        detach,
        fields,
    })
}

fn compile_html(raw: RawHtml) -> Result<HtmlRules> {
    let markers = |rules: Vec<RawMarker>| -> Result<Vec<MarkerRule>> {
        rules
            .into_iter()
            .map(|m| {
                Ok(MarkerRule {
                    selector: css(&m.selector)?,
                    contains: m.contains,
                })
            })
            .collect()
    };

    Ok(HtmlRules {
        introduction: markers(raw.introduction)?,
        references: markers(raw.references)?,
        skip: raw.skip.as_deref().map(css).transpose()?,
        table: css(&raw.table)?,
        table_link: css(&raw.table_link)?,
        table_link_attribute: raw.table_link_attribute,
        table_name_pattern: Regex::new(&raw.table_name_pattern)
            .map_err(|e| ExtractError::InvalidRule(format!("table_name_pattern: {e}")))?,
    })
}

fn css(selector: &str) -> Result<scraper::Selector> {
    scraper::Selector::parse(selector)
        .map_err(|e| ExtractError::InvalidRule(format!("CSS selector {selector:?}: {e:?}")))
}
