//! Atomic on-disk artifact store.
//!
//! Every file is written to a temp file in its final directory and renamed
//! into place, sidecars first and `meta.json` last. A reader that can see a
//! meta document can therefore also see every sidecar it lists.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::addressing::{ShardLayout, SidecarField};
use crate::error::{FulltextError, Result};
use crate::models::{Artifact, ArtifactMeta, ExtractedContent, Record, UpdateReason};

const PERSIST_ATTEMPTS: u32 = 3;

#[cfg(unix)]
const FILE_MODE: u32 = 0o640;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { path: PathBuf },
    /// Re-delivery request for an artifact that is already complete on disk.
    Skipped { path: PathBuf },
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Written { path } | Self::Skipped { path } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ShardLayout,
}

impl ArtifactStore {
    pub fn new(layout: ShardLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Persist the extraction result of a record.
    pub fn write_artifact(
        &self,
        record: &Record,
        content: &ExtractedContent,
    ) -> Result<WriteOutcome> {
        let dir = self.layout.artifact_dir(&record.identifier)?;
        fs::create_dir_all(&dir).map_err(|source| FulltextError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let meta_path = self.layout.meta_path(&record.identifier)?;
        if record.update_reason == Some(UpdateReason::ForceToSend)
            && meta_path.is_file()
            && self
                .layout
                .sidecar_path(&record.identifier, SidecarField::FullText)?
                .is_file()
        {
            debug!(identifier = %record.identifier, "artifact already complete, not rewriting");
            return Ok(WriteOutcome::Skipped { path: dir });
        }

        let meta = ArtifactMeta::from_record(record, content);

        let mut staged = Vec::with_capacity(meta.sidecars.len() + 1);
        for field in &meta.sidecars {
            let text = match field {
                SidecarField::FullText => content.full_text.as_str(),
                SidecarField::Acknowledgements => {
                    content.acknowledgements.as_deref().unwrap_or_default()
                }
                SidecarField::StructuredText => {
                    content.structured_text.as_deref().unwrap_or_default()
                }
            };
            let temp = stage_compressed(&dir, text)?;
            staged.push((temp, dir.join(field.file_name())));
        }
        staged.push((stage_meta(&dir, &meta)?, meta_path));

        for (temp, target) in staged {
            persist_with_retry(temp, &target)?;
        }

        info!(
            identifier = %record.identifier,
            path = %dir.display(),
            sidecars = meta.sidecars.len(),
            "artifact written"
        );
        Ok(WriteOutcome::Written { path: dir })
    }

    /// Load an artifact. `Ok(None)` when nothing was ever written for it.
    pub fn read_artifact(&self, identifier: &str) -> Result<Option<Artifact>> {
        let Some(meta) = self.read_meta(identifier)? else {
            return Ok(None);
        };

        let full_text = self
            .read_sidecar(identifier, SidecarField::FullText)?
            .unwrap_or_default();
        let acknowledgements = if meta.has_sidecar(SidecarField::Acknowledgements) {
            self.read_sidecar(identifier, SidecarField::Acknowledgements)?
        } else {
            None
        };
        let structured_text = if meta.has_sidecar(SidecarField::StructuredText) {
            self.read_sidecar(identifier, SidecarField::StructuredText)?
        } else {
            None
        };

        Ok(Some(Artifact {
            meta,
            full_text,
            acknowledgements,
            structured_text,
        }))
    }

    pub fn read_meta(&self, identifier: &str) -> Result<Option<ArtifactMeta>> {
        let path = self.layout.meta_path(identifier)?;
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FulltextError::io_at(path, e)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Atomically replace the meta document alone, leaving sidecars untouched.
    pub fn write_meta(&self, meta: &ArtifactMeta) -> Result<PathBuf> {
        let dir = self.layout.artifact_dir(&meta.identifier)?;
        fs::create_dir_all(&dir).map_err(|source| FulltextError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = self.layout.meta_path(&meta.identifier)?;
        persist_with_retry(stage_meta(&dir, meta)?, &path)?;
        debug!(identifier = %meta.identifier, "meta rewritten");
        Ok(path)
    }

    fn read_sidecar(&self, identifier: &str, field: SidecarField) -> Result<Option<String>> {
        let path = self.layout.sidecar_path(identifier, field)?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if field == SidecarField::FullText {
                    warn!(identifier, "full-text sidecar missing, using empty text");
                }
                return Ok(None);
            }
            Err(e) => return Err(FulltextError::io_at(path, e)),
        };

        let mut text = String::new();
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(|e| FulltextError::io_at(&path, e))?;
        Ok(Some(text))
    }
}

fn stage_compressed(dir: &Path, text: &str) -> Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| FulltextError::io_at(dir, e))?;
    let path = temp.path().to_path_buf();
    // No file name and a zero mtime in the header: same text, same bytes.
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(temp.as_file_mut(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| FulltextError::io_at(&path, e))?;
    encoder.finish().map_err(|e| FulltextError::io_at(&path, e))?;
    finish_temp(&temp)?;
    Ok(temp)
}

fn stage_meta(dir: &Path, meta: &ArtifactMeta) -> Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| FulltextError::io_at(dir, e))?;
    let json = serde_json::to_vec_pretty(meta)?;
    temp.write_all(&json)
        .map_err(|e| FulltextError::io_at(temp.path(), e))?;
    finish_temp(&temp)?;
    Ok(temp)
}

fn finish_temp(temp: &NamedTempFile) -> Result<()> {
    temp.as_file()
        .sync_all()
        .map_err(|e| FulltextError::io_at(temp.path(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(FILE_MODE))
            .map_err(|e| FulltextError::io_at(temp.path(), e))?;
    }
    Ok(())
}

fn persist_with_retry(mut temp: NamedTempFile, target: &Path) -> Result<()> {
    let mut attempt = 1;
    loop {
        match temp.persist(target) {
            Ok(_) => return Ok(()),
            Err(e) if attempt < PERSIST_ATTEMPTS => {
                warn!(
                    path = %target.display(),
                    attempt,
                    error = %e.error,
                    "rename failed, retrying"
                );
                attempt += 1;
                temp = e.file;
            }
            Err(e) => {
                return Err(FulltextError::Persist {
                    path: target.to_path_buf(),
                    source: e.error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(ShardLayout::new(dir.path()));
        (dir, store)
    }

    fn record(reason: UpdateReason) -> Record {
        Record::new("2015TEST", "/data/2015TEST.xml", "A&A").with_reason(reason)
    }

    #[test]
    fn test_write_and_read_artifact() {
        let (_dir, store) = setup();
        let mut content = ExtractedContent::from_text("Full text body");
        content.acknowledgements = Some("We thank the referee".into());
        content.dataset_ids = vec!["ds1".into(), "ds2".into()];

        let outcome = store
            .write_artifact(&record(UpdateReason::NotExtractedBefore), &content)
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Written { .. }));
        assert!(outcome.path().ends_with("20/15/TE/ST"));

        let artifact = store.read_artifact("2015TEST").unwrap().unwrap();
        assert_eq!(artifact.full_text, "Full text body");
        assert_eq!(
            artifact.acknowledgements.as_deref(),
            Some("We thank the referee")
        );
        assert_eq!(artifact.meta.dataset, vec!["ds1", "ds2"]);
        assert_eq!(artifact.meta.ft_source.as_deref(), Some("/data/2015TEST.xml"));
        assert_eq!(artifact.structured_text, None);
    }

    #[test]
    fn test_dotted_identifiers_keep_separate_artifacts() {
        let (_dir, store) = setup();
        for (id, text) in [
            ("1999AJ....117....1A", "text of A"),
            ("1998AJ....116....1A", "text of B"),
        ] {
            let record = Record::new(id, "/data/paper.txt", "AAS")
                .with_reason(UpdateReason::NotExtractedBefore);
            store
                .write_artifact(&record, &ExtractedContent::from_text(text))
                .unwrap();
        }

        let a = store.read_artifact("1999AJ....117....1A").unwrap().unwrap();
        assert_eq!(a.meta.identifier, "1999AJ....117....1A");
        assert_eq!(a.full_text, "text of A");
        let b = store.read_artifact("1998AJ....116....1A").unwrap().unwrap();
        assert_eq!(b.full_text, "text of B");
    }

    #[test]
    fn test_read_missing_artifact() {
        let (_dir, store) = setup();
        assert!(store.read_artifact("2015NONE").unwrap().is_none());
    }

    #[test]
    fn test_empty_full_text_is_still_written() {
        let (_dir, store) = setup();
        store
            .write_artifact(&record(UpdateReason::NotExtractedBefore), &ExtractedContent::default())
            .unwrap();
        let sidecar = store
            .layout()
            .sidecar_path("2015TEST", SidecarField::FullText)
            .unwrap();
        assert!(sidecar.is_file());
        let ack = store
            .layout()
            .sidecar_path("2015TEST", SidecarField::Acknowledgements)
            .unwrap();
        assert!(!ack.exists());
    }

    #[test]
    fn test_missing_full_text_sidecar_reads_as_empty() {
        let (_dir, store) = setup();
        store
            .write_artifact(
                &record(UpdateReason::NotExtractedBefore),
                &ExtractedContent::from_text("body"),
            )
            .unwrap();
        fs::remove_file(
            store
                .layout()
                .sidecar_path("2015TEST", SidecarField::FullText)
                .unwrap(),
        )
        .unwrap();

        let artifact = store.read_artifact("2015TEST").unwrap().unwrap();
        assert_eq!(artifact.full_text, "");
    }

    #[test]
    fn test_force_to_send_skips_complete_artifact() {
        let (_dir, store) = setup();
        store
            .write_artifact(
                &record(UpdateReason::NotExtractedBefore),
                &ExtractedContent::from_text("original"),
            )
            .unwrap();

        let outcome = store
            .write_artifact(
                &record(UpdateReason::ForceToSend),
                &ExtractedContent::from_text("replacement"),
            )
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Skipped { .. }));
        let artifact = store.read_artifact("2015TEST").unwrap().unwrap();
        assert_eq!(artifact.full_text, "original");
    }

    #[test]
    fn test_force_to_send_writes_when_nothing_stored() {
        let (_dir, store) = setup();
        let outcome = store
            .write_artifact(
                &record(UpdateReason::ForceToSend),
                &ExtractedContent::from_text("fresh"),
            )
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Written { .. }));
    }

    #[test]
    fn test_rewrite_is_idempotent_and_leaves_no_temp_files() {
        let (_dir, store) = setup();
        let content = ExtractedContent::from_text("same text");
        let rec = record(UpdateReason::ForceToExtract);
        store.write_artifact(&rec, &content).unwrap();
        store.write_artifact(&rec, &content).unwrap();

        let dir = store.layout().artifact_dir("2015TEST").unwrap();
        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["fulltext.txt.gz", "meta.json"]);
        assert_eq!(
            store.read_artifact("2015TEST").unwrap().unwrap().full_text,
            "same text"
        );
    }

    #[test]
    fn test_rewrite_produces_identical_sidecar_bytes() {
        let (_dir, store) = setup();
        let mut content = ExtractedContent::from_text("same text");
        content.acknowledgements = Some("same thanks".into());
        let rec = record(UpdateReason::ForceToExtract);
        let read_sidecars = || {
            [SidecarField::FullText, SidecarField::Acknowledgements].map(|field| {
                fs::read(store.layout().sidecar_path("2015TEST", field).unwrap()).unwrap()
            })
        };

        store.write_artifact(&rec, &content).unwrap();
        let first = read_sidecars();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.write_artifact(&rec, &content).unwrap();
        let second = read_sidecars();

        assert_eq!(first, second);
        // gzip header: magic, deflate, no flags, zero mtime.
        assert_eq!(&first[0][..8], &[0x1f, 0x8b, 8, 0, 0, 0, 0, 0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_group_readable() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = setup();
        store
            .write_artifact(
                &record(UpdateReason::NotExtractedBefore),
                &ExtractedContent::from_text("body"),
            )
            .unwrap();
        let meta = store.layout().meta_path("2015TEST").unwrap();
        let mode = fs::metadata(meta).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_write_meta_keeps_sidecars() {
        let (_dir, store) = setup();
        store
            .write_artifact(
                &record(UpdateReason::NotExtractedBefore),
                &ExtractedContent::from_text("body"),
            )
            .unwrap();
        let mut meta = store.read_meta("2015TEST").unwrap().unwrap();
        meta.facility_ack = Some(vec!["ALMA".into()]);
        store.write_meta(&meta).unwrap();

        let artifact = store.read_artifact("2015TEST").unwrap().unwrap();
        assert_eq!(artifact.meta.facility_ack, Some(vec!["ALMA".to_string()]));
        assert_eq!(artifact.full_text, "body");
    }
}
