//! Format-keyed extractor dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fulltext_core::{ExtractedContent, Format, FulltextConfig, FulltextError, Record};
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::http::HttpFetcher;
use crate::normalize::TextNormalizer;
use crate::pdf::PdfConverter;
use crate::rules::{RuleSet, XmlProfile};
use crate::{html, text, xml};

/// Provider whose XML keeps namespace prefixes and needs qualified selectors.
const NAMESPACED_XML_PROVIDER: &str = "Elsevier";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlFlavor {
    Generic,
    Namespaced,
    Tei,
}

/// Every extraction strategy. Adding a format means adding a variant here
/// and an arm in [`Extractor::for_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    PlainText,
    Xml(XmlFlavor),
    Html,
    Http,
    Pdf,
}

impl Extractor {
    pub fn for_record(format: &Format, provider: &str) -> Result<Self> {
        Ok(match format {
            Format::Txt | Format::Ocr => Self::PlainText,
            Format::Xml if provider == NAMESPACED_XML_PROVIDER => Self::Xml(XmlFlavor::Namespaced),
            Format::Xml => Self::Xml(XmlFlavor::Generic),
            Format::TeiXml => Self::Xml(XmlFlavor::Tei),
            Format::Html => Self::Html,
            Format::Http => Self::Http,
            Format::Pdf => Self::Pdf,
            Format::Other(ext) => return Err(ExtractError::UnsupportedFormat(ext.clone())),
        })
    }
}

/// Runtime knobs of the extractors, usually taken from [`FulltextConfig`].
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub max_word_length: usize,
    pub pdf_converter: PathBuf,
    pub pdf_timeout: Duration,
    pub user_agent: String,
    pub http_timeout: Duration,
}

impl ExtractorSettings {
    pub fn from_config(config: &FulltextConfig) -> Self {
        Self {
            max_word_length: config.extraction.max_word_length,
            pdf_converter: PathBuf::from(&config.pdf.converter),
            pdf_timeout: Duration::from_secs(config.pdf.timeout_secs),
            user_agent: config.http.user_agent.clone(),
            http_timeout: Duration::from_secs(config.http.timeout_secs),
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self::from_config(&FulltextConfig::default())
    }
}

pub struct ExtractorDispatch {
    rules: Arc<RuleSet>,
    normalizer: TextNormalizer,
    http: HttpFetcher,
    pdf: PdfConverter,
}

impl ExtractorDispatch {
    pub fn new(rules: RuleSet, settings: ExtractorSettings) -> Result<Self> {
        Ok(Self {
            rules: Arc::new(rules),
            normalizer: TextNormalizer::with_max_word_length(settings.max_word_length),
            http: HttpFetcher::new(&settings.user_agent, settings.http_timeout)?,
            pdf: PdfConverter::new(settings.pdf_converter, settings.pdf_timeout),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    /// Extract a record. HTML records treat their extra sources as tables;
    /// for every other format each source is extracted and the results merged.
    pub async fn extract(&self, record: &Record) -> Result<ExtractedContent> {
        let Some(primary) = record.primary_source() else {
            return Err(FulltextError::MissingSource(record.identifier.clone()).into());
        };
        let format = record
            .effective_format()
            .unwrap_or_else(|| Format::from_source(primary));
        let extractor = Extractor::for_record(&format, &record.provider)?;
        debug!(
            identifier = %record.identifier,
            format = %format,
            extractor = ?extractor,
            sources = record.source_locations.len(),
            "dispatching extraction"
        );

        if extractor == Extractor::Html {
            let rules = Arc::clone(&self.rules);
            let normalizer = self.normalizer;
            let primary = primary.to_string();
            let auxiliary = record.auxiliary_sources().to_vec();
            return tokio::task::spawn_blocking(move || {
                html::extract_files(&primary, &auxiliary, &rules.html, &normalizer)
            })
            .await?;
        }

        let mut content = ExtractedContent::default();
        for source in &record.source_locations {
            content.merge(self.extract_one(extractor, source).await?);
        }
        Ok(content)
    }

    async fn extract_one(&self, extractor: Extractor, source: &str) -> Result<ExtractedContent> {
        match extractor {
            Extractor::PlainText => {
                let normalizer = self.normalizer;
                let path = PathBuf::from(source);
                tokio::task::spawn_blocking(move || text::extract_file(&path, &normalizer)).await?
            }
            Extractor::Xml(flavor) => {
                let rules = Arc::clone(&self.rules);
                let normalizer = self.normalizer;
                let path = PathBuf::from(source);
                tokio::task::spawn_blocking(move || {
                    xml::extract_file(&path, profile(&rules, flavor), &normalizer)
                })
                .await?
            }
            Extractor::Html => {
                let rules = Arc::clone(&self.rules);
                let normalizer = self.normalizer;
                let path = source.to_string();
                tokio::task::spawn_blocking(move || {
                    html::extract_files(&path, &[], &rules.html, &normalizer)
                })
                .await?
            }
            Extractor::Http => {
                let body = self.http.fetch(source, None).await?;
                Ok(ExtractedContent::from_text(self.normalizer.normalize(&body)))
            }
            Extractor::Pdf => {
                let raw = self.pdf.convert(Path::new(source)).await?;
                Ok(ExtractedContent::from_text(self.normalizer.normalize(&raw)))
            }
        }
    }
}

fn profile(rules: &RuleSet, flavor: XmlFlavor) -> &XmlProfile {
    match flavor {
        XmlFlavor::Generic => &rules.xml,
        XmlFlavor::Namespaced => &rules.xml_namespaced,
        XmlFlavor::Tei => &rules.teixml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_core::UpdateReason;
    use tempfile::TempDir;

    fn dispatch() -> ExtractorDispatch {
        ExtractorDispatch::new(RuleSet::builtin().unwrap(), ExtractorSettings::default()).unwrap()
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_extractor_table() {
        assert_eq!(
            Extractor::for_record(&Format::Ocr, "").unwrap(),
            Extractor::PlainText
        );
        assert_eq!(
            Extractor::for_record(&Format::Xml, "IOP").unwrap(),
            Extractor::Xml(XmlFlavor::Generic)
        );
        assert_eq!(
            Extractor::for_record(&Format::Xml, "Elsevier").unwrap(),
            Extractor::Xml(XmlFlavor::Namespaced)
        );
        assert_eq!(
            Extractor::for_record(&Format::TeiXml, "Elsevier").unwrap(),
            Extractor::Xml(XmlFlavor::Tei)
        );
        assert!(matches!(
            Extractor::for_record(&Format::Other("docx".into()), ""),
            Err(ExtractError::UnsupportedFormat(ext)) if ext == "docx"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_format_is_per_record_error() {
        let record = Record::new("2020ApJ...1..1A", "/data/paper.docx", "Wiley");
        let err = dispatch().extract(&record).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_record_without_source() {
        let record = Record::with_sources("2020ApJ...1..1A", Vec::new(), "Wiley");
        let err = dispatch().extract(&record).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Core(FulltextError::MissingSource(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_text_sources_are_merged() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "part1.ocr", "Page  one.");
        let second = write(&dir, "part2.ocr", "Page two.");
        let record = Record::with_sources("1950Obs....1....1A", vec![first, second], "NASA")
            .with_reason(UpdateReason::NotExtractedBefore);

        let content = dispatch().extract(&record).await.unwrap();
        assert_eq!(content.full_text, "Page one. Page two.");
    }

    #[tokio::test]
    async fn test_elsevier_xml_uses_qualified_selectors() {
        let dir = TempDir::new().unwrap();
        let source = write(
            &dir,
            "paper.xml",
            "<ja:article xmlns:ja=\"x\" xmlns:ce=\"y\"><ja:body><ce:para>Elsevier text.</ce:para></ja:body></ja:article>",
        );
        let record = Record::new("2019NewA...1....1A", &source, "Elsevier");
        let content = dispatch().extract(&record).await.unwrap();
        assert_eq!(content.full_text, "Elsevier text.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pdf_runs_the_converter() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("convert.sh");
        std::fs::write(&script, "#!/bin/sh\nprintf 'PDF\\t text\\n\\n'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let pdf = write(&dir, "paper.pdf", "%PDF");

        let settings = ExtractorSettings {
            pdf_converter: script,
            ..Default::default()
        };
        let dispatch = ExtractorDispatch::new(RuleSet::builtin().unwrap(), settings).unwrap();
        let record = Record::new("2021A&A...1A...1B", &pdf, "A&A");
        let content = dispatch.extract(&record).await.unwrap();
        assert_eq!(content.full_text, "PDF text");
    }
}
