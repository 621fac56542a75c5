//! Per-notification pipeline and the worker threads that run it.
//!
//! Idle -> Downloading -> Splitting? -> Converting/Placing (per page)
//!   -> Manifesting? -> SourceCleanup? -> Acknowledging -> Idle
//!
//! Any failure up to the last placement aborts: later steps are skipped and
//! nothing is acknowledged. Pages placed before a failing page stay where
//! they are. The working directory is removed on every path.

use crate::config::{PageMode, Settings};
use crate::error::IngestError;
use crate::manifest::ManifestRenderer;
use crate::metadata::MetadataResolver;
use crate::notify::Notification;
use crate::partition::{Target, converted_name, destination_for, id_from_filename, strip_extension};
use crate::process::{Invocation, invoke};
use crate::queue::MessageQueue;
use crate::storage::ObjectStore;
use crate::util::{copy_file, ensure_dir};
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Downloading,
    Splitting,
    Converting,
    Placing,
    Manifesting,
    SourceCleanup,
    Acknowledging,
}

#[derive(Debug)]
pub enum Outcome {
    Acknowledged {
        placed: Vec<Target>,
        manifest: Option<PathBuf>,
    },
    Aborted {
        stage: Stage,
        error: IngestError,
    },
}

impl Outcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Outcome::Acknowledged { .. })
    }
}

type StageResult<T> = std::result::Result<T, (Stage, IngestError)>;

fn at<T>(stage: Stage, r: std::result::Result<T, IngestError>) -> StageResult<T> {
    r.map_err(|e| (stage, e))
}

pub struct Pipeline {
    settings: Arc<Settings>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    resolver: MetadataResolver,
    manifest: Option<ManifestRenderer>,
}

impl Pipeline {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<Self> {
        let resolver = MetadataResolver::new(&settings)?;
        let manifest = settings.manifest.as_ref().map(ManifestRenderer::new);
        Ok(Self {
            settings,
            store,
            queue,
            resolver,
            manifest,
        })
    }

    pub fn with_resolver(mut self, resolver: MetadataResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_manifest(mut self, renderer: ManifestRenderer) -> Self {
        self.manifest = Some(renderer);
        self
    }

    /// Runs the whole pipeline for one notification.
    pub fn process(&self, worker_id: usize, notify: &Notification) -> Outcome {
        let started = Instant::now();
        info!("[worker {worker_id}] processing {}/{}", notify.bucket, notify.key);

        let outcome = match self.run(worker_id, notify) {
            Ok((placed, manifest)) => Outcome::Acknowledged { placed, manifest },
            Err((stage, error)) => {
                error!("[worker {worker_id}] {} aborted in {stage:?}: {error}", notify.key);
                Outcome::Aborted { stage, error }
            }
        };

        if outcome.is_acknowledged() {
            info!(
                "[worker {worker_id}] processing {} complete in {:.2} seconds",
                notify.key,
                started.elapsed().as_secs_f64()
            );
        }
        outcome
    }

    fn run(&self, worker_id: usize, notify: &Notification) -> StageResult<(Vec<Target>, Option<PathBuf>)> {
        let id = id_from_filename(&notify.key);
        at(Stage::Validating, self.validate_id(&id))?;

        let placed = self.ingest(worker_id, notify, &id)?;

        let mut manifest = None;
        if let Some(renderer) = &self.manifest {
            debug!("[worker {worker_id}] {}: {:?}", notify.key, Stage::Manifesting);
            match self.create_manifest(worker_id, renderer, &id, &placed) {
                Ok(path) => {
                    info!("[worker {worker_id}] wrote manifest {}", path.display());
                    manifest = Some(path);
                }
                Err(e) => {
                    error!("[worker {worker_id}] manifest for {id} failed: {e:#}");
                    if self.settings.manifest.as_ref().is_some_and(|m| m.required) {
                        return Err((Stage::Manifesting, IngestError::Manifest(e)));
                    }
                }
            }
        }

        if self.settings.delete_source {
            debug!("[worker {worker_id}] {}: {:?}", notify.key, Stage::SourceCleanup);
            info!("[worker {worker_id}] removing source object {}/{}", notify.bucket, notify.key);
            if let Err(e) = self.store.delete(&notify.bucket, &notify.key) {
                error!("[worker {worker_id}] removing {}/{} failed: {e:#}", notify.bucket, notify.key);
                if self.settings.require_source_delete {
                    return Err((Stage::SourceCleanup, IngestError::SourceDelete(e)));
                }
            }
        }

        debug!("[worker {worker_id}] {}: {:?}", notify.key, Stage::Acknowledging);
        self.queue
            .delete(&notify.receipt)
            .map_err(|e| (Stage::Acknowledging, IngestError::Acknowledge(e)))?;
        info!("[worker {worker_id}] acknowledged {}", notify.key);

        Ok((placed, manifest))
    }

    fn validate_id(&self, id: &str) -> std::result::Result<(), IngestError> {
        match &self.settings.id_pattern {
            Some(re) if !re.is_match(id) => Err(IngestError::Naming {
                id: id.to_string(),
                pattern: re.as_str().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Download, split and convert/place inside a private working directory
    /// that is gone when this returns.
    fn ingest(&self, worker_id: usize, notify: &Notification, id: &str) -> StageResult<Vec<Target>> {
        let workdir = at(Stage::Downloading, self.make_workdir(worker_id))?;

        debug!("[worker {worker_id}] {}: {:?}", notify.key, Stage::Downloading);
        let download = at(Stage::Downloading, self.download(worker_id, notify, workdir.path()))?;

        let pages = match &self.settings.pages {
            PageMode::Single => vec![download],
            PageMode::Split(_) => {
                debug!("[worker {worker_id}] {}: {:?}", notify.key, Stage::Splitting);
                at(Stage::Splitting, self.split(worker_id, &download))?
            }
        };

        let placed = self.convert_and_place(worker_id, id, &pages, workdir.path())?;

        let path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            debug!("[worker {worker_id}] ignoring cleanup error for {}: {e}", path.display());
        }
        Ok(placed)
    }

    fn make_workdir(&self, worker_id: usize) -> std::result::Result<TempDir, IngestError> {
        tempfile::Builder::new()
            .prefix(&format!("worker-{worker_id}-"))
            .tempdir_in(&self.settings.work_dir)
            .with_context(|| format!("creating work directory in {}", self.settings.work_dir.display()))
            .map_err(IngestError::Download)
    }

    fn download(&self, worker_id: usize, notify: &Notification, workdir: &Path) -> std::result::Result<PathBuf, IngestError> {
        let name = notify.key.rsplit('/').next().unwrap_or(&notify.key);
        if name.is_empty() {
            return Err(IngestError::Download(anyhow!("object key has no file name: {}", notify.key)));
        }
        let dest = workdir.join(name);
        let size = self
            .store
            .get_to_file(&notify.bucket, &notify.key, &dest)
            .map_err(IngestError::Download)?;
        if notify.expected_size > 0 && size != notify.expected_size {
            warn!(
                "[worker {worker_id}] {} downloaded {size} bytes, expected {}",
                notify.key, notify.expected_size
            );
        }
        info!("[worker {worker_id}] downloaded {} ({size} bytes)", dest.display());
        Ok(dest)
    }

    fn split(&self, worker_id: usize, input: &Path) -> std::result::Result<Vec<PathBuf>, IngestError> {
        let PageMode::Split(tool) = &self.settings.pages else {
            return Ok(vec![input.to_path_buf()]);
        };
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        let base = file_stem(input);
        let pattern = dir.join(format!("{base}-%03d.{}", tool.suffix));
        let inv = Invocation::build(tool, input, &pattern.to_string_lossy());
        invoke(worker_id, "split", &inv).map_err(IngestError::Split)?;

        let pages = discover_pages(dir, &base, &tool.suffix, input).map_err(IngestError::Split)?;
        if pages.is_empty() {
            return Err(IngestError::Split(anyhow!("split of {} produced no pages", input.display())));
        }
        info!("[worker {worker_id}] split {} into {} pages", input.display(), pages.len());
        Ok(pages)
    }

    fn convert_and_place(
        &self,
        worker_id: usize,
        id: &str,
        pages: &[PathBuf],
        workdir: &Path,
    ) -> StageResult<Vec<Target>> {
        let converted_dir = workdir.join("converted");
        at(Stage::Converting, ensure_dir(&converted_dir).map_err(IngestError::Convert))?;

        let mut placed = Vec::with_capacity(pages.len());
        for page in pages {
            let target = destination_for(&self.settings, id, page);

            if self.settings.fail_on_overwrite {
                let exists = at(Stage::Placing, self.target_exists(&target).map_err(IngestError::Placement))?;
                if exists {
                    return Err((Stage::Placing, IngestError::Overwrite(target.display_path())));
                }
            }

            debug!("[worker {worker_id}] {}: {:?}", page.display(), Stage::Converting);
            let converted = converted_dir.join(converted_name(page, &self.settings.convert.suffix));
            let inv = Invocation::build(&self.settings.convert, page, &converted.to_string_lossy());
            at(Stage::Converting, invoke(worker_id, "convert", &inv).map_err(IngestError::Convert))?;

            debug!("[worker {worker_id}] {}: {:?}", page.display(), Stage::Placing);
            at(Stage::Placing, self.place(worker_id, &converted, &target).map_err(IngestError::Placement))?;
            placed.push(target);
        }
        Ok(placed)
    }

    fn target_exists(&self, target: &Target) -> Result<bool> {
        match target {
            Target::File(p) => Ok(p.exists()),
            Target::Object { bucket, key } => self.store.exists(bucket, key),
        }
    }

    fn place(&self, worker_id: usize, converted: &Path, target: &Target) -> Result<()> {
        match target {
            Target::File(dest) => {
                if let Some(parent) = dest.parent() {
                    ensure_dir(parent)?;
                }
                info!("[worker {worker_id}] copying '{}' -> '{}'", converted.display(), dest.display());
                copy_file(converted, dest)?;
                Ok(())
            }
            Target::Object { bucket, key } => self.store.put_file(converted, bucket, key),
        }
    }

    fn create_manifest(
        &self,
        worker_id: usize,
        renderer: &ManifestRenderer,
        id: &str,
        placed: &[Target],
    ) -> Result<PathBuf> {
        let pages: Vec<PathBuf> = placed
            .iter()
            .map(|t| match t {
                Target::File(p) => p.clone(),
                Target::Object { .. } => PathBuf::from(t.display_path()),
            })
            .collect();
        let metadata = self
            .resolver
            .resolve(worker_id, id)
            .with_context(|| format!("resolving metadata for {id}"))?;
        renderer.create(id, &self.settings.id_placeholder, &pages, metadata)
    }
}

fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    strip_extension(&name).to_string()
}

/// Files in `dir` named `{base}*.{suffix}`, other than `exclude`, in lexical order.
pub fn discover_pages(dir: &Path, base: &str, suffix: &str, exclude: &Path) -> Result<Vec<PathBuf>> {
    let ending = format!(".{suffix}");
    let mut pages: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.as_path() != exclude)
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n.starts_with(base) && n.ends_with(&ending))
        })
        .collect();
    pages.sort();
    Ok(pages)
}

/// Starts `count` workers pulling notifications from `work` until it closes.
pub fn spawn_workers(
    count: usize,
    pipeline: Arc<Pipeline>,
    work: Receiver<Notification>,
) -> Result<Vec<JoinHandle<()>>> {
    (1..=count)
        .map(|worker_id| {
            let pipeline = Arc::clone(&pipeline);
            let work = work.clone();
            std::thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    info!("[worker {worker_id}] ready");
                    for notify in work.iter() {
                        pipeline.process(worker_id, &notify);
                    }
                    info!("[worker {worker_id}] work queue closed, exiting");
                })
                .with_context(|| format!("spawning worker {worker_id}"))
        })
        .collect()
}
