#![allow(dead_code)]

use anyhow::Result;
use iiif_ingest::config::Config;
use iiif_ingest::manifest::inspect::{PageAttributes, PageInspector};
use iiif_ingest::queue::{Message, MessageQueue, ReceiptHandle};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Queue double that records acknowledgements.
#[derive(Default)]
pub struct RecordingQueue {
    pub acked: Mutex<Vec<ReceiptHandle>>,
}

impl RecordingQueue {
    pub fn ack_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }
}

impl MessageQueue for RecordingQueue {
    fn receive(&self, _max: usize, _wait: Duration) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        self.acked.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}

/// Inspector double: fixed dimensions, name taken from the path.
pub struct FixedInspector;

impl PageInspector for FixedInspector {
    fn inspect(&self, path: &Path) -> Result<PageAttributes> {
        anyhow::ensure!(path.is_file(), "no such file: {}", path.display());
        Ok(PageAttributes {
            filename: path.file_name().unwrap().to_string_lossy().into_owned(),
            extension: "jpg".into(),
            width: "1200".into(),
            height: "1800".into(),
            mime_type: "image/jpeg".into(),
        })
    }
}

/// Writes a shell script; run it through `sh` rather than exec'ing it.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    path
}

/// Minimal valid configuration rooted in `root`: convert with `cp`, place on
/// the filesystem.
pub fn base_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.service.queue_name = "ingest-test".into();
    cfg.service.work_dir = root.join("work").display().to_string();
    cfg.service.poll_timeout_secs = 0;
    cfg.convert.binary = "cp".into();
    cfg.convert.suffix = "jpg".into();
    cfg.output.fs_root = root.join("out").display().to_string();
    std::fs::create_dir_all(root.join("work")).unwrap();
    cfg
}

/// Runs a script through `sh` with `%IN%`/`%OUT%` substituted.
pub fn script_tool(cfg_tool: &mut iiif_ingest::config::Tool, script: &Path, suffix: &str) {
    cfg_tool.binary = "sh".into();
    cfg_tool.suffix = suffix.into();
    cfg_tool.template = format!("{} %IN% %OUT%", script.display());
    cfg_tool.input_token = "%IN%".into();
    cfg_tool.output_token = "%OUT%".into();
}

/// Number of entries left under the work root.
pub fn work_entries(root: &Path) -> usize {
    std::fs::read_dir(root.join("work")).unwrap().count()
}
