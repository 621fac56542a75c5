use crate::error::IngestError;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "IIIF_INGEST_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: Service,
    pub split: Tool,
    pub convert: Tool,
    pub output: Output,
    pub naming: Naming,
    pub manifest: Manifest,
    pub metadata: Metadata,
    pub queue: Queue,
    pub storage: Storage,
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Loads `path` when it exists, otherwise starts from defaults, then applies
    /// `IIIF_INGEST_*` overrides from the process environment.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => Self::load(p)?,
            Some(p) => anyhow::bail!("config file does not exist: {}", p.display()),
            None => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    /// Overlays environment values fetched through `lookup` (called with the
    /// full variable name).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        env_str(get("IN_QUEUE"), &mut self.service.queue_name);
        env_parse(get("QUEUE_POLL_TIMEOUT"), "QUEUE_POLL_TIMEOUT", &mut self.service.poll_timeout_secs)?;
        env_str(get("WORK_DIR"), &mut self.service.work_dir);
        env_parse(get("WORK_QUEUE_SIZE"), "WORK_QUEUE_SIZE", &mut self.service.work_queue_size)?;
        env_parse(get("WORKERS"), "WORKERS", &mut self.service.workers)?;

        env_str(get("SPLIT_BIN"), &mut self.split.binary);
        env_str(get("SPLIT_SUFFIX"), &mut self.split.suffix);
        env_str(get("SPLIT_OPTS"), &mut self.split.options);
        env_str(get("SPLIT_TEMPLATE"), &mut self.split.template);
        env_str(get("SPLIT_INPUT_TOKEN"), &mut self.split.input_token);
        env_str(get("SPLIT_OUTPUT_TOKEN"), &mut self.split.output_token);

        env_str(get("CONVERT_BIN"), &mut self.convert.binary);
        env_str(get("CONVERT_SUFFIX"), &mut self.convert.suffix);
        env_str(get("CONVERT_OPTS"), &mut self.convert.options);
        env_str(get("CONVERT_TEMPLATE"), &mut self.convert.template);
        env_str(get("CONVERT_INPUT_TOKEN"), &mut self.convert.input_token);
        env_str(get("CONVERT_OUTPUT_TOKEN"), &mut self.convert.output_token);

        env_parse(get("DELETE_AFTER_PROCESS"), "DELETE_AFTER_PROCESS", &mut self.output.delete_source)?;
        env_parse(get("FAIL_ON_OVERWRITE"), "FAIL_ON_OVERWRITE", &mut self.output.fail_on_overwrite)?;
        env_str(get("OUTPUT_FS_ROOT"), &mut self.output.fs_root);
        env_str(get("OUTPUT_BUCKET"), &mut self.output.bucket);
        env_str(get("OUTPUT_BUCKET_ROOT"), &mut self.output.bucket_root);
        env_parse(get("PARTITION_OUTPUT_DIR"), "PARTITION_OUTPUT_DIR", &mut self.output.partition)?;

        env_str(get("ID_PLACEHOLDER"), &mut self.naming.id_placeholder);
        env_str(get("ID_PATTERN"), &mut self.naming.id_pattern);

        env_str(get("MANIFEST_TEMPLATE"), &mut self.manifest.template_path);
        env_str(get("IIIF_SERVICE_ROOT"), &mut self.manifest.iiif_service_root);
        env_str(get("MANIFEST_OUTPUT_NAME"), &mut self.manifest.output_name_template);
        env_str(get("MANIFEST_OUTPUT_DIR"), &mut self.manifest.output_dir);
        env_str(get("COPYRIGHT"), &mut self.manifest.copyright);

        env_str(get("METADATA_QUERY_URL"), &mut self.metadata.query_endpoint);
        env_str(get("METADATA_AUTH_URL"), &mut self.metadata.auth_endpoint);
        env_str(get("METADATA_QUERY_TEMPLATE"), &mut self.metadata.query_template);
        env_parse(get("METADATA_TIMEOUT"), "METADATA_TIMEOUT", &mut self.metadata.timeout_secs)?;

        env_str(get("SPOOL_DIR"), &mut self.queue.spool_dir);
        env_str(get("STORAGE_ROOT"), &mut self.storage.root);
        Ok(())
    }
}

fn env_str(value: Option<String>, slot: &mut String) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn env_parse<T>(value: Option<String>, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = value {
        *slot = v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {ENV_PREFIX}{name} ({v}): {e}"))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub queue_name: String,
    pub poll_timeout_secs: u64,
    pub work_dir: String,
    pub work_queue_size: usize,
    pub workers: usize,
}
impl Default for Service {
    fn default() -> Self {
        Self {
            queue_name: "".into(),
            poll_timeout_secs: 20,
            work_dir: "/tmp".into(),
            work_queue_size: 1,
            workers: 1,
        }
    }
}

/// An external binary, configured either with a command template containing
/// input/output tokens or with a plain options string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tool {
    pub binary: String,
    pub suffix: String,
    pub options: String,
    pub template: String,
    pub input_token: String,
    pub output_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub fs_root: String,
    pub bucket: String,
    pub bucket_root: String,
    pub partition: bool,
    pub fail_on_overwrite: bool,
    pub delete_source: bool,
    pub require_source_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
    pub id_placeholder: String,
    pub id_pattern: String,
}
impl Default for Naming {
    fn default() -> Self {
        Self {
            id_placeholder: "{ID}".into(),
            id_pattern: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub template_path: String,
    pub output_name_template: String,
    pub output_dir: String,
    pub iiif_service_root: String,
    pub copyright: String,
    pub extract_binary: String,
    pub require_success: bool,
}
impl Default for Manifest {
    fn default() -> Self {
        Self {
            template_path: "".into(),
            output_name_template: "{ID}.json".into(),
            output_dir: "".into(),
            iiif_service_root: "".into(),
            copyright: "".into(),
            extract_binary: "exiftool".into(),
            require_success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub query_endpoint: String,
    pub auth_endpoint: String,
    pub query_template: String,
    pub timeout_secs: u64,
}
impl Default for Metadata {
    fn default() -> Self {
        Self {
            query_endpoint: "".into(),
            auth_endpoint: "".into(),
            query_template: "".into(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub spool_dir: String,
    pub visibility_timeout_secs: u64,
}
impl Default for Queue {
    fn default() -> Self {
        Self {
            spool_dir: "spool".into(),
            visibility_timeout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub root: String,
}
impl Default for Storage {
    fn default() -> Self {
        Self {
            root: "objects".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// validated settings

/// How command-line arguments are built for an external binary.
#[derive(Debug, Clone, Serialize)]
pub enum ArgStrategy {
    /// Whitespace-split template; tokens are substituted inside each word.
    Template {
        words: Vec<String>,
        input_token: String,
        output_token: String,
    },
    /// `binary <input> <options...> <output>`
    Options(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub binary: PathBuf,
    pub suffix: String,
    pub args: ArgStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub enum PageMode {
    Single,
    Split(ToolSpec),
}

#[derive(Debug, Clone, Serialize)]
pub enum Destination {
    Filesystem { root: PathBuf },
    Bucket { bucket: String, root: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestSettings {
    pub template_path: PathBuf,
    pub output_name_template: String,
    pub output_dir: PathBuf,
    pub iiif_service_root: String,
    pub copyright: String,
    pub extract_binary: PathBuf,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataSettings {
    pub query_endpoint: String,
    pub auth_endpoint: Option<String>,
    pub query_template: String,
    pub timeout: Duration,
}

/// Validated, read-only configuration shared by the dispatcher and workers.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub queue_name: String,
    pub poll_timeout: Duration,
    pub work_dir: PathBuf,
    pub work_queue_size: usize,
    pub workers: usize,
    pub pages: PageMode,
    pub convert: ToolSpec,
    pub destination: Destination,
    pub partition: bool,
    pub fail_on_overwrite: bool,
    pub delete_source: bool,
    pub require_source_delete: bool,
    pub id_placeholder: String,
    #[serde(skip)]
    pub id_pattern: Option<Regex>,
    pub manifest: Option<ManifestSettings>,
    pub metadata: Option<MetadataSettings>,
}

fn invalid(msg: impl Into<String>) -> IngestError {
    IngestError::Config(msg.into())
}

fn tool_spec(section: &str, tool: &Tool) -> Result<ToolSpec, IngestError> {
    if tool.suffix.trim().is_empty() {
        return Err(invalid(format!("{section}.suffix is required when {section}.binary is set")));
    }
    let args = if !tool.template.trim().is_empty()
        && !tool.input_token.is_empty()
        && !tool.output_token.is_empty()
    {
        if !tool.template.contains(&tool.input_token) || !tool.template.contains(&tool.output_token) {
            return Err(invalid(format!(
                "{section}.template must contain both {} and {}",
                tool.input_token, tool.output_token
            )));
        }
        ArgStrategy::Template {
            words: tool.template.split_whitespace().map(str::to_string).collect(),
            input_token: tool.input_token.clone(),
            output_token: tool.output_token.clone(),
        }
    } else {
        ArgStrategy::Options(tool.options.split_whitespace().map(str::to_string).collect())
    };
    Ok(ToolSpec {
        binary: PathBuf::from(tool.binary.trim()),
        suffix: tool.suffix.trim().trim_start_matches('.').to_string(),
        args,
    })
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Result<Self, IngestError> {
        let svc = &cfg.service;
        if svc.queue_name.trim().is_empty() {
            return Err(invalid("service.queue_name is required"));
        }
        if svc.work_dir.trim().is_empty() {
            return Err(invalid("service.work_dir is required"));
        }
        if svc.workers == 0 {
            return Err(invalid("service.workers must be at least 1"));
        }
        if svc.work_queue_size == 0 {
            return Err(invalid("service.work_queue_size must be at least 1"));
        }

        let pages = match non_empty(&cfg.split.binary) {
            Some(_) => PageMode::Split(tool_spec("split", &cfg.split)?),
            None => PageMode::Single,
        };

        if cfg.convert.binary.trim().is_empty() {
            return Err(invalid("convert.binary is required"));
        }
        let convert = tool_spec("convert", &cfg.convert)?;

        let out = &cfg.output;
        let destination = match (non_empty(&out.fs_root), non_empty(&out.bucket)) {
            (Some(root), None) => Destination::Filesystem {
                root: PathBuf::from(root),
            },
            (None, Some(bucket)) => Destination::Bucket {
                bucket,
                root: non_empty(&out.bucket_root).map(|r| r.trim_matches('/').to_string()),
            },
            (Some(_), Some(_)) => {
                return Err(invalid("output.fs_root and output.bucket are mutually exclusive"));
            }
            (None, None) => return Err(invalid("one of output.fs_root or output.bucket is required")),
        };

        if out.partition && matches!(pages, PageMode::Split(_)) {
            return Err(invalid("output.partition cannot be combined with split processing"));
        }

        if cfg.naming.id_placeholder.is_empty() {
            return Err(invalid("naming.id_placeholder is required"));
        }
        let id_pattern = match non_empty(&cfg.naming.id_pattern) {
            Some(p) => Some(
                Regex::new(&p).map_err(|e| invalid(format!("naming.id_pattern is invalid: {e}")))?,
            ),
            None => None,
        };

        let manifest = match non_empty(&cfg.manifest.template_path) {
            None => None,
            Some(template) => {
                let m = &cfg.manifest;
                let template_path = PathBuf::from(template);
                if !template_path.is_file() {
                    return Err(invalid(format!(
                        "manifest.template_path does not exist: {}",
                        template_path.display()
                    )));
                }
                if !matches!(destination, Destination::Filesystem { .. }) {
                    return Err(invalid("a manifest requires output.fs_root"));
                }
                let output_dir = non_empty(&m.output_dir)
                    .ok_or_else(|| invalid("manifest.output_dir is required with a manifest template"))?;
                let output_name_template = non_empty(&m.output_name_template).ok_or_else(|| {
                    invalid("manifest.output_name_template is required with a manifest template")
                })?;
                Some(ManifestSettings {
                    template_path,
                    output_name_template,
                    output_dir: PathBuf::from(output_dir),
                    iiif_service_root: m.iiif_service_root.clone(),
                    copyright: m.copyright.clone(),
                    extract_binary: PathBuf::from(
                        non_empty(&m.extract_binary).unwrap_or_else(|| "exiftool".into()),
                    ),
                    required: m.require_success,
                })
            }
        };

        let metadata = match non_empty(&cfg.metadata.query_endpoint) {
            None => None,
            Some(query_endpoint) => {
                let md = &cfg.metadata;
                if md.query_template.trim().is_empty() {
                    return Err(invalid("metadata.query_template is required with a query endpoint"));
                }
                Some(MetadataSettings {
                    query_endpoint,
                    auth_endpoint: non_empty(&md.auth_endpoint),
                    query_template: md.query_template.clone(),
                    timeout: Duration::from_secs(md.timeout_secs.max(1)),
                })
            }
        };

        Ok(Self {
            queue_name: svc.queue_name.trim().to_string(),
            poll_timeout: Duration::from_secs(svc.poll_timeout_secs),
            work_dir: PathBuf::from(svc.work_dir.trim()),
            work_queue_size: svc.work_queue_size,
            workers: svc.workers,
            pages,
            convert,
            destination,
            partition: out.partition,
            fail_on_overwrite: out.fail_on_overwrite,
            delete_source: out.delete_source,
            require_source_delete: out.require_source_delete,
            id_placeholder: cfg.naming.id_placeholder.clone(),
            id_pattern,
            manifest,
            metadata,
        })
    }

    /// Writes every effective setting to the log, one line each.
    pub fn log_summary(&self) {
        info!("[config] queue_name            = [{}]", self.queue_name);
        info!("[config] poll_timeout          = [{:?}]", self.poll_timeout);
        info!("[config] work_dir              = [{}]", self.work_dir.display());
        info!("[config] work_queue_size       = [{}]", self.work_queue_size);
        info!("[config] workers               = [{}]", self.workers);
        match &self.pages {
            PageMode::Single => info!("[config] split                 = [disabled]"),
            PageMode::Split(t) => info!("[config] split                 = [{} .{} {:?}]", t.binary.display(), t.suffix, t.args),
        }
        info!(
            "[config] convert               = [{} .{} {:?}]",
            self.convert.binary.display(),
            self.convert.suffix,
            self.convert.args
        );
        info!("[config] destination           = [{:?}]", self.destination);
        info!("[config] partition             = [{}]", self.partition);
        info!("[config] fail_on_overwrite     = [{}]", self.fail_on_overwrite);
        info!("[config] delete_source         = [{}]", self.delete_source);
        info!("[config] require_source_delete = [{}]", self.require_source_delete);
        info!("[config] id_placeholder        = [{}]", self.id_placeholder);
        info!(
            "[config] id_pattern            = [{}]",
            self.id_pattern.as_ref().map(|r| r.as_str()).unwrap_or("")
        );
        match &self.manifest {
            Some(m) => info!(
                "[config] manifest              = [{} -> {}/{} required={}]",
                m.template_path.display(),
                m.output_dir.display(),
                m.output_name_template,
                m.required
            ),
            None => info!("[config] manifest              = [disabled]"),
        }
        match &self.metadata {
            Some(m) => info!(
                "[config] metadata              = [{} auth={:?} timeout={:?}]",
                m.query_endpoint, m.auth_endpoint, m.timeout
            ),
            None => info!("[config] metadata              = [disabled]"),
        }
    }
}
