//! Full-text extraction: format dispatch, extractors, rules, pipeline.

pub mod dispatch;
pub mod error;
pub mod facilities;
pub mod html;
pub mod http;
pub mod normalize;
pub mod pdf;
pub mod pipeline;
pub mod rules;
pub mod structured;
pub mod text;
pub mod xml;

pub use dispatch::{Extractor, ExtractorDispatch, ExtractorSettings, XmlFlavor};
pub use error::{ExtractError, Result};
pub use facilities::{
    FacilityRecognizer, GazetteerRecognizer, identify_facilities, recognize_content,
};
pub use normalize::{NormalizeOptions, TextNormalizer};
pub use pipeline::{BatchReport, Pipeline, ProcessedRecord, RecordOutcome};
pub use rules::RuleSet;
