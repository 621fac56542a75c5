use crate::process::{Invocation, run_stdout};
use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Technical attributes of one placed page file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAttributes {
    pub filename: String,
    pub extension: String,
    pub width: String,
    pub height: String,
    pub mime_type: String,
}

pub trait PageInspector: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<PageAttributes>;
}

/// Reads attributes with `exiftool -json`.
pub struct ExifTool {
    binary: PathBuf,
}

impl ExifTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

fn value_string(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Parses exiftool's JSON output for a single file.
pub fn parse_exiftool_json(raw: &[u8]) -> Result<PageAttributes> {
    let entries: Vec<Map<String, Value>> =
        serde_json::from_slice(raw).with_context(|| "parsing exiftool output")?;
    let obj = entries
        .first()
        .ok_or_else(|| anyhow!("exiftool returned no entries"))?;
    if let Some(err) = obj.get("Error").and_then(Value::as_str) {
        return Err(anyhow!("exiftool: {err}"));
    }
    Ok(PageAttributes {
        filename: value_string(obj, "FileName"),
        extension: value_string(obj, "FileTypeExtension"),
        width: value_string(obj, "ImageWidth"),
        height: value_string(obj, "ImageHeight"),
        mime_type: value_string(obj, "MIMEType"),
    })
}

impl PageInspector for ExifTool {
    fn inspect(&self, path: &Path) -> Result<PageAttributes> {
        let inv = Invocation::new(
            &self.binary,
            [
                "-json".to_string(),
                "-FileName".into(),
                "-FileTypeExtension".into(),
                "-ImageWidth".into(),
                "-ImageHeight".into(),
                "-MIMEType".into(),
                path.to_string_lossy().into_owned(),
            ],
        );
        let out = run_stdout(&inv).with_context(|| format!("inspecting {}", path.display()))?;
        parse_exiftool_json(&out)
    }
}
