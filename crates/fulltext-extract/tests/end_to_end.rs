use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use fulltext_core::{
    ArtifactStore, ExtractedContent, Record, ShardLayout, SidecarField, UpdateReason,
    read_links_file,
};
use fulltext_extract::{ExtractorDispatch, ExtractorSettings, Pipeline, RecordOutcome, RuleSet};
use tempfile::TempDir;

fn pipeline(root: &Path) -> Pipeline {
    let dispatch =
        ExtractorDispatch::new(RuleSet::builtin().unwrap(), ExtractorSettings::default()).unwrap();
    Pipeline::new(ShardLayout::new(root), dispatch)
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn text_record_from_links_file() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let text = write(sources.path(), "paper.txt", "  Plain\u{a0}text\tbody.\n");
    let links = write(
        sources.path(),
        "links.tsv",
        &format!("2003ApJ...593..100B\t{text}\tIOP\n\n"),
    );

    let records = read_links_file(Path::new(&links), false).unwrap();
    let report = pipeline(store_dir.path()).process_batch(records).await;
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.ready.len(), 1);

    let dir = store_dir.path().join("20/03/Ap/J,/,,/59/3,/,1/00/B");
    assert!(dir.join("meta.json").is_file());
    assert!(dir.join("fulltext.txt.gz").is_file());
    assert!(!dir.join("acknowledgements.txt.gz").exists());

    let store = ArtifactStore::new(ShardLayout::new(store_dir.path()));
    let artifact = store.read_artifact("2003ApJ...593..100B").unwrap().unwrap();
    assert_eq!(artifact.full_text, "Plain text body.");
    assert_eq!(
        artifact.meta.update_reason,
        Some(UpdateReason::NotExtractedBefore)
    );
    assert_eq!(artifact.meta.ft_source.as_deref(), Some(text.as_str()));
}

#[tokio::test]
async fn reruns_report_up_to_date_then_stale_content() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let source = write(
        sources.path(),
        "test1.txt",
        "Introduction THIS IS AN INTERESTING TITLE",
    );
    let pipeline = pipeline(store_dir.path());
    let batch = || vec![Record::new("test1", &source, "TEST")];

    let first = pipeline.process_batch(batch()).await;
    assert_eq!(first.ready.len(), 1);
    assert!(matches!(
        first.ready[0].outcome,
        RecordOutcome::Extracted {
            reason: UpdateReason::NotExtractedBefore,
            written: true,
            ..
        }
    ));
    let dir = store_dir.path().join("te/st/1");
    assert!(dir.join("meta.json").is_file());
    assert!(dir.join("fulltext.txt.gz").is_file());
    let artifact = pipeline.store().read_artifact("test1").unwrap().unwrap();
    assert_eq!(
        artifact.full_text,
        "Introduction THIS IS AN INTERESTING TITLE"
    );

    let second = pipeline.process_batch(batch()).await;
    assert!(second.ready.is_empty());
    assert_eq!(second.up_to_date, vec!["test1"]);

    std::fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();
    let third = pipeline.process_batch(batch()).await;
    assert_eq!(third.ready.len(), 1);
    assert!(matches!(
        third.ready[0].outcome,
        RecordOutcome::Extracted {
            reason: UpdateReason::StaleContent,
            ..
        }
    ));
    let meta = pipeline.store().read_meta("test1").unwrap().unwrap();
    assert_eq!(meta.update_reason, Some(UpdateReason::StaleContent));
}

#[tokio::test]
async fn deeply_nested_xml_does_not_take_down_the_batch() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let ok = write(sources.path(), "ok.txt", "Plain record.");
    let deep = write(
        sources.path(),
        "deep.xml",
        &format!(
            "<article><body><p>Surface.</p>{}bottom</body></article>",
            "<br>".repeat(20_000)
        ),
    );

    let report = pipeline(store_dir.path())
        .process_batch(vec![
            Record::new("2020ApJ...1..1A", &ok, "IOP"),
            Record::new("2020ApJ...1..2B", &deep, "IOP"),
        ])
        .await;

    assert!(report.failed.is_empty(), "{:?}", report.failed);
    let mut ready: Vec<_> = report.ready.iter().map(|r| r.identifier.as_str()).collect();
    ready.sort();
    assert_eq!(ready, vec!["2020ApJ...1..1A", "2020ApJ...1..2B"]);

    let store = ArtifactStore::new(ShardLayout::new(store_dir.path()));
    let artifact = store.read_artifact("2020ApJ...1..2B").unwrap().unwrap();
    assert_eq!(artifact.full_text, "Surface. bottom");
}

#[tokio::test]
async fn xml_record_keeps_every_dataset_id() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let xml = write(
        sources.path(),
        "paper.xml",
        r#"<article xmlns:xlink="http://www.w3.org/1999/xlink"><body>
<p>We used archival data.</p>
<named-content content-type="dataset" xlink:href="ADS/IRSA.Atlas#2MASS"/>
<named-content content-type="dataset" xlink:href="ADS/Sa.HST#O6H04VAXQ"/>
<ack><p>Thanks.</p></ack>
</body></article>"#,
    );

    let pipeline = pipeline(store_dir.path());
    pipeline
        .process(Record::new("2015MNRAS.446.1045X", &xml, "OUP"))
        .await
        .unwrap();

    let artifact = pipeline
        .store()
        .read_artifact("2015MNRAS.446.1045X")
        .unwrap()
        .unwrap();
    assert_eq!(
        artifact.meta.dataset,
        vec!["ADS/IRSA.Atlas#2MASS", "ADS/Sa.HST#O6H04VAXQ"]
    );
    assert_eq!(artifact.full_text, "We used archival data.");
    assert_eq!(artifact.acknowledgements.as_deref(), Some("Thanks."));
    assert!(artifact.meta.has_sidecar(SidecarField::Acknowledgements));
}

#[tokio::test]
async fn html_record_with_table_file() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let html = write(
        sources.path(),
        "aa1234.html",
        "<html><body><p>Masthead</p><h2>1. Introduction</h2>\
         <p>Results are in <a href=\"aa1234-table2.html\">Table 2</a>.</p>\
         <h2>References</h2><ul><li>A. Author</li></ul></body></html>",
    );
    let table = write(
        sources.path(),
        "aa1234-table2.html",
        "<html><body><div><table><tr><td>Flux</td><td>3.2</td></tr></table></div></body></html>",
    );

    let pipeline = pipeline(store_dir.path());
    let record = Record::new("2005A&A...430..421W", &format!("{html},{table}"), "A&A");
    assert_eq!(record.source_locations.len(), 2);
    pipeline.process(record).await.unwrap();

    let artifact = pipeline
        .store()
        .read_artifact("2005A&A...430..421W")
        .unwrap()
        .unwrap();
    assert_eq!(
        artifact.full_text,
        "1. Introduction Results are in Flux 3.2 ."
    );
}

#[tokio::test]
async fn forced_rewrite_is_byte_identical() {
    let sources = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let text = write(sources.path(), "paper.ocr", "Scanned page.");
    let pipeline = pipeline(store_dir.path());

    let mut listings = Vec::new();
    let mut sidecars = Vec::new();
    for _ in 0..2 {
        let outcome = pipeline
            .process(
                Record::new("1920Obs....43...10A", &text, "NASA")
                    .with_reason(UpdateReason::ForceToExtract),
            )
            .await
            .unwrap();
        let RecordOutcome::Extracted { path, written, .. } = outcome else {
            panic!("expected an extraction, got {outcome:?}");
        };
        assert!(written);

        let mut names: Vec<String> = std::fs::read_dir(&path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        listings.push(names);
        sidecars.push(std::fs::read(Path::new(&path).join("fulltext.txt.gz")).unwrap());
        // Let the clock move so a timestamp in the gzip header would differ.
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }

    assert_eq!(listings[0], listings[1]);
    assert_eq!(listings[0], vec!["fulltext.txt.gz", "meta.json"]);
    assert_eq!(sidecars[0], sidecars[1], "sidecar bytes changed on rewrite");
    let artifact = pipeline
        .store()
        .read_artifact("1920Obs....43...10A")
        .unwrap()
        .unwrap();
    assert_eq!(artifact.full_text, "Scanned page.");
}

#[test]
fn concurrent_reader_never_sees_a_dangling_sidecar() {
    let store_dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(ShardLayout::new(store_dir.path()));
    let identifier = "2010PhRvD..81b3004A";
    let record =
        Record::new(identifier, "/data/paper.xml", "APS").with_reason(UpdateReason::ForceToExtract);

    let plain = ExtractedContent::from_text("version without acknowledgements");
    let with_ack = ExtractedContent {
        full_text: "version with acknowledgements".into(),
        acknowledgements: Some("We thank the staff.".into()),
        ..Default::default()
    };
    store.write_artifact(&record, &plain).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = store.clone();
        let done = Arc::clone(&done);
        let record = record.clone();
        std::thread::spawn(move || {
            for i in 0..200 {
                let content = if i % 2 == 0 { &with_ack } else { &plain };
                store.write_artifact(&record, content).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut reads = 0;
    while !done.load(Ordering::SeqCst) || reads == 0 {
        let artifact = store.read_artifact(identifier).unwrap().unwrap();
        if artifact.meta.has_sidecar(SidecarField::Acknowledgements) {
            assert_eq!(
                artifact.acknowledgements.as_deref(),
                Some("We thank the staff.")
            );
        }
        assert!(
            artifact.full_text == "version without acknowledgements"
                || artifact.full_text == "version with acknowledgements",
            "torn full text: {:?}",
            artifact.full_text
        );
        reads += 1;
    }
    writer.join().unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(store.layout().artifact_dir(identifier).unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.ends_with(".gz") && name != "meta.json")
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
}
