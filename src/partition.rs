//! Destination naming: document identifiers, partitioned directories and the
//! final path or object key of a converted page.

use crate::config::{Destination, Settings};
use std::path::{Path, PathBuf};

/// Identifier of a document: the base name of `file` without its extension.
pub fn id_from_filename(file: &str) -> String {
    let base = file.rsplit('/').next().unwrap_or(file);
    strip_extension(base).to_string()
}

/// `name` without its final `.ext`, leaving dot-files alone.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(ix) if ix > 0 => &name[..ix],
        _ => name,
    }
}

/// Directory for `id`. Unpartitioned, this is the identifier itself.
/// Partitioned, a leading ASCII letter is dropped and the rest is cut
/// into two-character segments: `c0002345` -> `00/02/34/5`.
pub fn output_dir_name(id: &str, partition: bool) -> String {
    if !partition {
        return id.to_string();
    }
    let mut chars = id.chars().peekable();
    if chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
        chars.next();
    }
    let mut dir = String::with_capacity(id.len() * 3 / 2);
    for (ix, c) in chars.enumerate() {
        if ix > 0 && ix % 2 == 0 {
            dir.push('/');
        }
        dir.push(c);
    }
    dir
}

/// Where a converted page ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(PathBuf),
    Object { bucket: String, key: String },
}

impl Target {
    /// The path recorded for the manifest and in log lines.
    pub fn display_path(&self) -> String {
        match self {
            Target::File(p) => p.display().to_string(),
            Target::Object { bucket, key } => format!("{bucket}/{key}"),
        }
    }
}

/// File name of the converted page: `page` stem plus the convert suffix.
pub fn converted_name(page: &Path, suffix: &str) -> String {
    let base = page
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.{}", strip_extension(&base), suffix)
}

/// Destination of one converted page of document `id`. Pure: the same inputs
/// always name the same place.
pub fn destination_for(settings: &Settings, id: &str, page: &Path) -> Target {
    let relative = format!(
        "{}/{}",
        output_dir_name(id, settings.partition),
        converted_name(page, &settings.convert.suffix)
    );
    match &settings.destination {
        Destination::Filesystem { root } => Target::File(root.join(relative)),
        Destination::Bucket { bucket, root } => Target::Object {
            bucket: bucket.clone(),
            key: match root {
                Some(r) => format!("{r}/{relative}"),
                None => relative,
            },
        },
    }
}
