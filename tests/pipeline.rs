mod common;

use common::{FixedInspector, RecordingQueue, base_config, script_tool, work_entries, write_script};
use iiif_ingest::config::{Config, MetadataSettings, Settings};
use iiif_ingest::error::{IngestError, TransportError};
use iiif_ingest::manifest::ManifestRenderer;
use iiif_ingest::manifest::inspect::{PageAttributes, PageInspector};
use iiif_ingest::metadata::MetadataResolver;
use iiif_ingest::metadata::http::Transport;
use iiif_ingest::notify::Notification;
use iiif_ingest::partition::Target;
use iiif_ingest::queue::ReceiptHandle;
use iiif_ingest::storage::{LocalObjectStore, ObjectStore};
use iiif_ingest::worker::{Outcome, Pipeline, Stage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SPLIT: &str = r#"cp "$1" "$(printf "$2" 1)" && cp "$1" "$(printf "$2" 2)""#;

struct Harness {
    queue: Arc<RecordingQueue>,
    store: Arc<LocalObjectStore>,
    pipeline: Pipeline,
}

fn harness(root: &Path, cfg: &Config) -> Harness {
    let settings = Arc::new(Settings::from_config(cfg).unwrap());
    let queue = Arc::new(RecordingQueue::default());
    let store = Arc::new(LocalObjectStore::new(root.join("objects")));
    let mut pipeline = Pipeline::new(Arc::clone(&settings), store.clone(), queue.clone()).unwrap();
    if let Some(m) = &settings.manifest {
        pipeline = pipeline.with_manifest(ManifestRenderer::with_inspector(m, Box::new(FixedInspector)));
    }
    Harness {
        queue,
        store,
        pipeline,
    }
}

fn upload(root: &Path, bucket: &str, key: &str, content: &[u8]) -> Notification {
    let path = root.join("objects").join(bucket).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    Notification {
        bucket: bucket.into(),
        key: key.into(),
        expected_size: content.len() as u64,
        receipt: ReceiptHandle(format!("receipt-{key}")),
    }
}

fn with_manifest(root: &Path, cfg: &mut Config) {
    let template = root.join("manifest.j2");
    std::fs::write(
        &template,
        "{{ Copyright }}|{{ IIIFUrl }}|{{ Metadata.Title }}\n\
         {% for p in Pages %}{{ p.Id }} {{ p.Filename }} {{ p.Width }}x{{ p.Height }} {{ p.Format }}\n{% endfor %}",
    )
    .unwrap();
    cfg.manifest.template_path = template.display().to_string();
    cfg.manifest.output_dir = root.join("manifests").display().to_string();
    cfg.manifest.output_name_template = "{ID}-manifest.txt".into();
    cfg.manifest.iiif_service_root = "https://iiif.test/iiif".into();
    cfg.manifest.copyright = "(c) Test Library".into();
}

#[test]
fn single_page_is_converted_placed_and_acknowledged() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    cfg.output.delete_source = true;
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "scans/c0002345.tif", b"page-bytes");

    let outcome = h.pipeline.process(1, &n);
    let (placed, manifest) = match outcome {
        Outcome::Acknowledged { placed, manifest } => (placed, manifest),
        other => panic!("expected acknowledgement, got {other:?}"),
    };
    let dest = root.join("out/c0002345/c0002345.jpg");
    assert_eq!(placed, vec![Target::File(dest.clone())]);
    assert_eq!(std::fs::read(&dest).unwrap(), b"page-bytes");
    assert!(manifest.is_none());
    assert!(!root.join("manifests").exists());
    assert!(!h.store.exists("inbound", "scans/c0002345.tif").unwrap());
    assert_eq!(h.queue.ack_count(), 1);
    assert_eq!(work_entries(root), 0);
}

#[test]
fn partitioned_output_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    cfg.output.partition = true;
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "c0002345.tif", b"x");

    assert!(h.pipeline.process(1, &n).is_acknowledged());
    assert!(root.join("out/00/02/34/5/c0002345.jpg").is_file());
    assert!(h.store.exists("inbound", "c0002345.tif").unwrap());
}

#[test]
fn split_pages_are_placed_in_order_with_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    let split = write_script(root, "split.sh", SPLIT);
    script_tool(&mut cfg.split, &split, "tif");
    with_manifest(root, &mut cfg);
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "incoming/doc.pdf", b"%PDF-1.4");

    let outcome = h.pipeline.process(2, &n);
    let (placed, manifest) = match outcome {
        Outcome::Acknowledged { placed, manifest } => (placed, manifest),
        other => panic!("expected acknowledgement, got {other:?}"),
    };
    assert_eq!(
        placed,
        vec![
            Target::File(root.join("out/doc/doc-001.jpg")),
            Target::File(root.join("out/doc/doc-002.jpg")),
        ]
    );

    let manifest = manifest.expect("manifest written");
    assert_eq!(manifest, root.join("manifests/doc-manifest.txt"));
    let text = std::fs::read_to_string(&manifest).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "(c) Test Library|https://iiif.test/iiif|<unspecified>");
    assert_eq!(lines[1], "doc-001 doc-001.jpg 1200x1800 image/jpeg");
    assert_eq!(lines[2], "doc-002 doc-002.jpg 1200x1800 image/jpeg");
    assert_eq!(lines.len(), 3);
    assert_eq!(h.queue.ack_count(), 1);
    assert_eq!(work_entries(root), 0);
}

#[test]
fn convert_failure_on_first_page_aborts() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    let split = write_script(root, "split.sh", SPLIT);
    script_tool(&mut cfg.split, &split, "tif");
    let convert = write_script(
        root,
        "convert.sh",
        r#"case "$1" in *-001.tif) echo "corrupt page" >&2; exit 3;; esac
cp "$1" "$2""#,
    );
    script_tool(&mut cfg.convert, &convert, "jpg");
    with_manifest(root, &mut cfg);
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "doc.pdf", b"%PDF");

    let outcome = h.pipeline.process(1, &n);
    assert!(
        matches!(outcome, Outcome::Aborted { stage: Stage::Converting, error: IngestError::Convert(_) }),
        "unexpected outcome {outcome:?}"
    );
    assert!(!root.join("out/doc/doc-001.jpg").exists());
    assert!(!root.join("out/doc/doc-002.jpg").exists());
    assert!(!root.join("manifests").exists());
    assert_eq!(h.queue.ack_count(), 0);
    assert_eq!(work_entries(root), 0);
}

#[test]
fn placement_failure_on_last_page_is_never_acknowledged() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    let split = write_script(root, "split.sh", SPLIT);
    script_tool(&mut cfg.split, &split, "tif");
    cfg.output.delete_source = true;
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "doc.pdf", b"%PDF");
    // a directory where the last page's file should go
    std::fs::create_dir_all(root.join("out/doc/doc-002.jpg")).unwrap();

    let outcome = h.pipeline.process(1, &n);
    assert!(
        matches!(outcome, Outcome::Aborted { stage: Stage::Placing, error: IngestError::Placement(_) }),
        "unexpected outcome {outcome:?}"
    );
    // earlier pages are not rolled back
    assert!(root.join("out/doc/doc-001.jpg").is_file());
    assert!(h.store.exists("inbound", "doc.pdf").unwrap());
    assert_eq!(h.queue.ack_count(), 0);
    assert_eq!(work_entries(root), 0);
}

#[test]
fn existing_destination_fails_when_overwrite_forbidden() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    cfg.output.fail_on_overwrite = true;
    let h = harness(root, &cfg);
    std::fs::create_dir_all(root.join("out/c0001")).unwrap();
    std::fs::write(root.join("out/c0001/c0001.jpg"), b"old").unwrap();
    let n = upload(root, "inbound", "c0001.tif", b"new");

    let outcome = h.pipeline.process(1, &n);
    assert!(matches!(outcome, Outcome::Aborted { error: IngestError::Overwrite(_), .. }));
    assert_eq!(std::fs::read(root.join("out/c0001/c0001.jpg")).unwrap(), b"old");
    assert_eq!(h.queue.ack_count(), 0);
}

#[test]
fn bucket_destination_uploads_under_key_root() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    cfg.output.fs_root.clear();
    cfg.output.bucket = "iiif".into();
    cfg.output.bucket_root = "images".into();
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "c0009.tif", b"img");

    let outcome = h.pipeline.process(1, &n);
    assert!(outcome.is_acknowledged(), "unexpected outcome {outcome:?}");
    assert!(h.store.exists("iiif", "images/c0009/c0009.jpg").unwrap());
}

#[test]
fn identifier_rejected_by_naming_policy() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    cfg.naming.id_pattern = r"^c\d{4,7}$".into();
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "scan-17.tif", b"x");

    let outcome = h.pipeline.process(1, &n);
    assert!(matches!(outcome, Outcome::Aborted { stage: Stage::Validating, .. }));
    assert_eq!(h.queue.ack_count(), 0);
}

#[test]
fn manifest_failure_blocks_acknowledgement_only_when_required() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    with_manifest(root, &mut cfg);
    // a file where the manifest directory should be
    std::fs::write(root.join("manifests"), b"").unwrap();

    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "c0003.tif", b"x");
    assert!(h.pipeline.process(1, &n).is_acknowledged());

    cfg.manifest.require_success = true;
    let h = harness(root, &cfg);
    let n = upload(root, "inbound", "c0004.tif", b"x");
    let outcome = h.pipeline.process(1, &n);
    assert!(matches!(outcome, Outcome::Aborted { stage: Stage::Manifesting, .. }));
    assert_eq!(h.queue.ack_count(), 0);
}

#[test]
fn missing_source_object_aborts_download() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let cfg = base_config(root);
    let h = harness(root, &cfg);
    let n = Notification {
        bucket: "inbound".into(),
        key: "gone.tif".into(),
        expected_size: 1,
        receipt: ReceiptHandle("r".into()),
    };

    let outcome = h.pipeline.process(1, &n);
    assert!(matches!(outcome, Outcome::Aborted { stage: Stage::Downloading, .. }));
    assert_eq!(h.queue.ack_count(), 0);
    assert_eq!(work_entries(root), 0);
}

struct CatalogStub;

impl Transport for CatalogStub {
    fn post(&self, _url: &str, _bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        assert_eq!(body, br#"{"q":"c0005"}"#);
        Ok(br#"{"group_list":[{"record_list":[{"fields":[
            {"name":"title","value":"Field Notes"},
            {"name":"author","value":"A. Surveyor"}
        ]}]}]}"#
            .to_vec())
    }
}

#[test]
fn catalog_metadata_reaches_the_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    with_manifest(root, &mut cfg);
    let h = harness(root, &cfg);
    let resolver = MetadataResolver::with_transport(
        MetadataSettings {
            query_endpoint: "http://catalog.test/search".into(),
            auth_endpoint: None,
            query_template: r#"{"q":"{ID}"}"#.into(),
            timeout: Duration::from_secs(1),
        },
        "{ID}",
        Box::new(CatalogStub),
    );
    let pipeline = h.pipeline.with_resolver(resolver);
    let n = upload(root, "inbound", "c0005.tif", b"x");

    assert!(pipeline.process(1, &n).is_acknowledged());
    let text = std::fs::read_to_string(root.join("manifests/c0005-manifest.txt")).unwrap();
    assert!(text.starts_with("(c) Test Library|https://iiif.test/iiif|Field Notes\n"), "{text}");
    assert!(text.contains("c0005 c0005.jpg 1200x1800 image/jpeg"));
}

/// Inspects like `FixedInspector` but cannot read the second page.
struct UnreadableSecondPage;

impl PageInspector for UnreadableSecondPage {
    fn inspect(&self, path: &Path) -> anyhow::Result<PageAttributes> {
        if path.to_string_lossy().ends_with("-002.jpg") {
            anyhow::bail!("exiftool: File format error");
        }
        FixedInspector.inspect(path)
    }
}

#[test]
fn extraction_failure_writes_no_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut cfg = base_config(root);
    let split = write_script(root, "split.sh", SPLIT);
    script_tool(&mut cfg.split, &split, "tif");
    with_manifest(root, &mut cfg);
    let manifest_settings = Settings::from_config(&cfg).unwrap().manifest.unwrap();

    let h = harness(root, &cfg);
    let pipeline = h
        .pipeline
        .with_manifest(ManifestRenderer::with_inspector(&manifest_settings, Box::new(UnreadableSecondPage)));
    let n = upload(root, "inbound", "doc.pdf", b"%PDF");

    let outcome = pipeline.process(1, &n);
    assert!(outcome.is_acknowledged(), "unexpected outcome {outcome:?}");
    assert!(root.join("out/doc/doc-002.jpg").is_file());
    assert!(!root.join("manifests/doc-manifest.txt").exists());
    assert_eq!(h.queue.ack_count(), 1);

    cfg.manifest.require_success = true;
    let h = harness(root, &cfg);
    let pipeline = h
        .pipeline
        .with_manifest(ManifestRenderer::with_inspector(&manifest_settings, Box::new(UnreadableSecondPage)));
    let outcome = pipeline.process(1, &upload(root, "inbound", "doc.pdf", b"%PDF"));
    assert!(matches!(outcome, Outcome::Aborted { stage: Stage::Manifesting, .. }));
    assert!(!root.join("manifests/doc-manifest.txt").exists());
    assert_eq!(h.queue.ack_count(), 0);
}
