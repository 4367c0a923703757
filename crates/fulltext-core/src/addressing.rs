//! Content addressing: where an identifier's artifact lives on disk.
//!
//! Identifiers are pairtree-encoded and split into 2-character groups, one
//! directory level each, which bounds the fan-out of any single directory
//! for very large corpora.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FulltextError, Result};

pub const META_FILE_NAME: &str = "meta.json";

/// Split a string into 2-character directory groups.
///
/// `2015TEST` → `20/15/TE/ST/`, `test4` → `te/st/4/`. Groups are counted in
/// Unicode scalar values, so multi-byte characters are never split.
pub fn path_for(identifier: &str) -> Result<String> {
    if identifier.is_empty() {
        return Err(FulltextError::InvalidIdentifier(identifier.to_string()));
    }

    let chars: Vec<char> = identifier.chars().collect();
    let mut path = String::with_capacity(identifier.len() + identifier.len() / 2 + 1);
    for group in chars.chunks(2) {
        path.extend(group);
        path.push('/');
    }
    Ok(path)
}

/// Pairtree cleaning of an identifier, so every shard group is a plain
/// directory name.
///
/// Characters outside visible ASCII and the reserved `"*+,<=>?\^|` become
/// `^xx` per UTF-8 byte, then `/` → `=`, `:` → `+` and `.` → `,`. The mapping
/// is injective, so distinct identifiers never share a directory.
pub fn encode_identifier(identifier: &str) -> String {
    let mut encoded = String::with_capacity(identifier.len());
    for c in identifier.chars() {
        match c {
            '/' => encoded.push('='),
            ':' => encoded.push('+'),
            '.' => encoded.push(','),
            '"' | '*' | '+' | ',' | '<' | '=' | '>' | '?' | '\\' | '^' | '|' => {
                push_hex(&mut encoded, c)
            }
            c if c.is_ascii_graphic() => encoded.push(c),
            c => push_hex(&mut encoded, c),
        }
    }
    encoded
}

fn push_hex(encoded: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for byte in c.encode_utf8(&mut buf).bytes() {
        encoded.push_str(&format!("^{byte:02x}"));
    }
}

/// A large text payload stored gzip-compressed next to `meta.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SidecarField {
    #[serde(rename = "fulltext")]
    FullText,
    #[serde(rename = "acknowledgements")]
    Acknowledgements,
    #[serde(rename = "grobid_fulltext")]
    StructuredText,
}

impl SidecarField {
    pub const ALL: [SidecarField; 3] = [
        SidecarField::FullText,
        SidecarField::Acknowledgements,
        SidecarField::StructuredText,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FullText => "fulltext",
            Self::Acknowledgements => "acknowledgements",
            Self::StructuredText => "grobid_fulltext",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::FullText | Self::Acknowledgements => "txt",
            Self::StructuredText => "xml",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}.gz", self.name(), self.extension())
    }
}

impl std::fmt::Display for SidecarField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves artifact paths under a store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    root: PathBuf,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shard directory of an identifier relative to the root: the pairtree
    /// encoding of the identifier, split by [`path_for`].
    pub fn relative_dir(&self, identifier: &str) -> Result<String> {
        path_for(&encode_identifier(identifier))
    }

    /// Absolute shard directory of an identifier. Always below the root.
    pub fn artifact_dir(&self, identifier: &str) -> Result<PathBuf> {
        Ok(self.root.join(self.relative_dir(identifier)?))
    }

    pub fn meta_path(&self, identifier: &str) -> Result<PathBuf> {
        Ok(self.artifact_dir(identifier)?.join(META_FILE_NAME))
    }

    pub fn sidecar_path(&self, identifier: &str, field: SidecarField) -> Result<PathBuf> {
        Ok(self.artifact_dir(identifier)?.join(field.file_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Component;

    #[test]
    fn test_path_for_even_length() {
        assert_eq!(path_for("2015TEST").unwrap(), "20/15/TE/ST/");
    }

    #[test]
    fn test_path_for_odd_length() {
        assert_eq!(path_for("test4").unwrap(), "te/st/4/");
        assert_eq!(path_for("x").unwrap(), "x/");
    }

    #[test]
    fn test_path_for_empty_is_rejected() {
        assert!(matches!(
            path_for(""),
            Err(FulltextError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_path_for_groups_concatenate_to_identifier() {
        for id in ["2015TEST", "test4", "1999A&A...351..369G", "2020ÄÖü"] {
            let path = path_for(id).unwrap();
            assert_eq!(path.replace('/', ""), id);
            assert!(path.ends_with('/'));
        }
    }

    #[test]
    fn test_path_for_counts_scalar_values() {
        assert_eq!(path_for("äöü").unwrap(), "äö/ü/");
    }

    #[test]
    fn test_layout_paths() {
        let layout = ShardLayout::new("/store");
        assert_eq!(
            layout.meta_path("2015TEST").unwrap(),
            PathBuf::from("/store/20/15/TE/ST/meta.json")
        );
        assert_eq!(
            layout
                .sidecar_path("test4", SidecarField::FullText)
                .unwrap(),
            PathBuf::from("/store/te/st/4/fulltext.txt.gz")
        );
        assert_eq!(
            layout
                .sidecar_path("test4", SidecarField::StructuredText)
                .unwrap(),
            PathBuf::from("/store/te/st/4/grobid_fulltext.xml.gz")
        );
    }

    #[test]
    fn test_encode_identifier() {
        assert_eq!(encode_identifier("2015TEST"), "2015TEST");
        assert_eq!(encode_identifier("2003ApJ...593..100B"), "2003ApJ,,,593,,100B");
        assert_eq!(encode_identifier("a/b:c"), "a=b+c");
        assert_eq!(encode_identifier("A&A+x y"), "A&A^2bx^20y");
        assert_eq!(encode_identifier("a\\b^"), "a^5cb^5e");
        assert_eq!(encode_identifier("é"), "^c3^a9");
    }

    #[test]
    fn test_layout_encodes_dots_and_separators() {
        let layout = ShardLayout::new("/store");
        assert_eq!(
            layout.artifact_dir("2003ApJ...593..100B").unwrap(),
            PathBuf::from("/store/20/03/Ap/J,/,,/59/3,/,1/00/B")
        );
        assert_eq!(
            layout.artifact_dir("/etc/passwd").unwrap(),
            PathBuf::from("/store/=e/tc/=p/as/sw/d")
        );
        assert_eq!(layout.relative_dir("..").unwrap(), ",,/");
        assert!(layout.artifact_dir("").is_err());
    }

    #[test]
    fn test_layout_keeps_distinct_identifiers_apart() {
        let layout = ShardLayout::new("/store");
        let a = layout.artifact_dir("1999AJ....117....1A").unwrap();
        let b = layout.artifact_dir("1998AJ....116....1A").unwrap();
        assert_ne!(a, b);
        for dir in [&a, &b] {
            assert!(
                dir.components()
                    .all(|c| !matches!(c, Component::ParentDir | Component::CurDir))
            );
        }
    }
}
