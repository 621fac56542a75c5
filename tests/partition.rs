mod common;

use iiif_ingest::config::Settings;
use iiif_ingest::partition::{Target, destination_for, id_from_filename, output_dir_name};
use std::path::Path;

#[test]
fn partitions_identifier_after_leading_letter() {
    assert_eq!(output_dir_name("c0002345", true), "00/02/34/5");
    assert_eq!(output_dir_name("c000234", true), "00/02/34");
}

#[test]
fn keeps_leading_digit() {
    assert_eq!(output_dir_name("12345", true), "12/34/5");
    assert_eq!(output_dir_name("1", true), "1");
    assert_eq!(output_dir_name("c", true), "");
}

#[test]
fn only_an_ascii_letter_is_dropped() {
    assert_eq!(output_dir_name("é012345", true), "é0/12/34/5");
    assert_eq!(output_dir_name("C012345", true), "01/23/45");
}

#[test]
fn unpartitioned_identifier_is_unchanged() {
    assert_eq!(output_dir_name("c0002345", false), "c0002345");
}

#[test]
fn identifier_from_key() {
    assert_eq!(id_from_filename("incoming/archives/c0002345.tif"), "c0002345");
    assert_eq!(id_from_filename("c0002345"), "c0002345");
    assert_eq!(id_from_filename("a.b.pdf"), "a.b");
}

#[test]
fn filesystem_destination_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = common::base_config(tmp.path());
    cfg.output.partition = true;
    let settings = Settings::from_config(&cfg).unwrap();

    let page = Path::new("/work/x/c0002345.tif");
    let first = destination_for(&settings, "c0002345", page);
    let second = destination_for(&settings, "c0002345", page);
    assert_eq!(first, second);
    assert_eq!(
        first,
        Target::File(tmp.path().join("out").join("00/02/34/5/c0002345.jpg"))
    );
}

#[test]
fn bucket_destination_uses_key_root() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = common::base_config(tmp.path());
    cfg.output.fs_root.clear();
    cfg.output.bucket = "images".into();
    cfg.output.bucket_root = "/iiif/".into();
    let settings = Settings::from_config(&cfg).unwrap();

    let target = destination_for(&settings, "doc", Path::new("doc-002.tif"));
    assert_eq!(
        target,
        Target::Object {
            bucket: "images".into(),
            key: "iiif/doc/doc-002.jpg".into()
        }
    );
}
