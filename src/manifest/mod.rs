pub mod inspect;

use crate::config::ManifestSettings;
use crate::metadata::Metadata;
use crate::util::{ensure_dir, substitute_once};
use anyhow::{Context, Result};
use inspect::{ExifTool, PageInspector};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Width")]
    pub width: String,
    #[serde(rename = "Height")]
    pub height: String,
    #[serde(rename = "Format")]
    pub format: String,
}

/// Everything a manifest template can refer to.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestData {
    #[serde(rename = "Copyright")]
    pub copyright: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "IIIFUrl")]
    pub iiif_url: String,
    #[serde(rename = "Metadata")]
    pub metadata: Metadata,
    #[serde(rename = "Pages")]
    pub pages: Vec<Image>,
}

pub struct ManifestRenderer {
    settings: ManifestSettings,
    inspector: Box<dyn PageInspector>,
}

impl ManifestRenderer {
    pub fn new(settings: &ManifestSettings) -> Self {
        let inspector = Box::new(ExifTool::new(&settings.extract_binary));
        Self::with_inspector(settings, inspector)
    }

    pub fn with_inspector(settings: &ManifestSettings, inspector: Box<dyn PageInspector>) -> Self {
        Self {
            settings: settings.clone(),
            inspector,
        }
    }

    /// Inspects every page in order; the first failure aborts.
    pub fn page_attributes(&self, pages: &[PathBuf]) -> Result<Vec<Image>> {
        pages
            .iter()
            .map(|p| {
                let a = self
                    .inspector
                    .inspect(p)
                    .with_context(|| format!("extracting attributes of {}", p.display()))?;
                let suffix = format!(".{}", a.extension);
                let id = match a.filename.strip_suffix(&suffix) {
                    Some(stem) if !a.extension.is_empty() => stem.to_string(),
                    _ => crate::partition::strip_extension(&a.filename).to_string(),
                };
                debug!("{id}/{} (w {}, h {}, f {})", a.filename, a.width, a.height, a.mime_type);
                Ok(Image {
                    id,
                    filename: a.filename,
                    width: a.width,
                    height: a.height,
                    format: a.mime_type,
                })
            })
            .collect()
    }

    pub fn build(&self, pages: &[PathBuf], metadata: Metadata) -> Result<ManifestData> {
        Ok(ManifestData {
            copyright: self.settings.copyright.clone(),
            url: String::new(),
            iiif_url: self.settings.iiif_service_root.clone(),
            metadata,
            pages: self.page_attributes(pages)?,
        })
    }

    pub fn output_path(&self, id: &str, id_placeholder: &str) -> PathBuf {
        let name = substitute_once(&self.settings.output_name_template, id_placeholder, id);
        self.settings.output_dir.join(name)
    }

    pub fn render(&self, data: &ManifestData) -> Result<String> {
        render_template(&self.settings.template_path, data)
    }

    /// Builds, renders and writes the manifest for document `id`.
    pub fn create(
        &self,
        id: &str,
        id_placeholder: &str,
        pages: &[PathBuf],
        metadata: Metadata,
    ) -> Result<PathBuf> {
        let data = self.build(pages, metadata)?;
        let rendered = self.render(&data)?;
        let out = self.output_path(id, id_placeholder);
        if let Some(parent) = out.parent() {
            ensure_dir(parent)?;
        }
        debug!("writing manifest ({})", out.display());
        std::fs::write(&out, rendered)
            .with_context(|| format!("writing {}", out.display()))
            .inspect_err(|e| error!("{e:#}"))?;
        Ok(out)
    }
}

pub fn render_template(template: &Path, data: &ManifestData) -> Result<String> {
    let source = std::fs::read_to_string(template)
        .with_context(|| format!("reading template {}", template.display()))?;
    let env = minijinja::Environment::new();
    let tmpl = env
        .template_from_str(&source)
        .with_context(|| format!("parsing template {}", template.display()))?;
    let rendered = tmpl
        .render(data)
        .with_context(|| format!("rendering template {}", template.display()))?;
    Ok(rendered)
}
