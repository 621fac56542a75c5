use crate::{
    config::{Config, PageMode, Settings},
    dispatch::{Dispatcher, work_queue},
    notify::{Notification, event_payload},
    process::resolve_binary,
    queue::{MessageQueue, NoQueue, ReceiptHandle, SpoolQueue},
    storage::{LocalObjectStore, ObjectStore},
    util::ensure_dir,
    worker::{Outcome, Pipeline, spawn_workers},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Subscriber, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "iiif-ingest")]
#[command(about = "Queue-driven document ingest: split, convert and place pages, then describe them")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./iiif-ingest.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive notifications and process them until killed.
    Run {},
    /// Validate configuration and print the effective settings.
    Check {},
    /// Run the pipeline once for a single object, outside the queue.
    Process {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
    /// Put a storage notification for an object on the spool queue.
    Enqueue {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load_layered(cfg_path.as_deref())?;
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    info!(
        "[main] ===> {} service starting up (version: {}) <===",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    let settings = Settings::from_config(&cfg)?;

    match &args.cmd {
        Command::Run {} => run(&cfg, settings),
        Command::Check {} => check(&settings),
        Command::Process { bucket, key, size } => process_one(&cfg, settings, bucket, key, *size),
        Command::Enqueue { bucket, key, size } => enqueue(&cfg, &settings, bucket, key, *size),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("iiif-ingest.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    let (file_log, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        (Some(file_layer(non_blocking)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_log)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// Plain-text layer for the log file; thread names carry the worker id.
pub fn file_layer<S, W>(writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .boxed()
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.service.work_dir).join("iiif-ingest.log"))
}

fn open_queue(cfg: &Config, settings: &Settings) -> Result<SpoolQueue> {
    SpoolQueue::open(
        Path::new(&cfg.queue.spool_dir),
        &settings.queue_name,
        Duration::from_secs(cfg.queue.visibility_timeout_secs),
    )
}

fn run(cfg: &Config, settings: Settings) -> Result<()> {
    settings.log_summary();
    ensure_dir(&settings.work_dir)?;

    let queue: Arc<dyn MessageQueue> = Arc::new(open_queue(cfg, &settings)?);
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&cfg.storage.root));
    let settings = Arc::new(settings);

    let pipeline = Arc::new(Pipeline::new(Arc::clone(&settings), store, Arc::clone(&queue))?);
    let (tx, rx) = work_queue(settings.work_queue_size);
    let _workers = spawn_workers(settings.workers, pipeline, rx)?;

    Dispatcher::new(queue, settings.poll_timeout, tx).run()
}

fn check(settings: &Settings) -> Result<()> {
    settings.log_summary();
    let mut binaries = vec![("convert", settings.convert.binary.clone())];
    if let PageMode::Split(tool) = &settings.pages {
        binaries.push(("split", tool.binary.clone()));
    }
    if let Some(m) = &settings.manifest {
        binaries.push(("extract", m.extract_binary.clone()));
    }

    let mut missing = Vec::new();
    let resolved: Vec<_> = binaries
        .iter()
        .map(|(label, bin)| {
            let found = resolve_binary(bin);
            if found.is_none() {
                missing.push(format!("{label}: {}", bin.display()));
            }
            serde_json::json!({ "role": label, "binary": bin, "resolved": found })
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "settings": settings,
            "binaries": resolved,
        }))?
    );

    if !missing.is_empty() {
        return Err(anyhow!("binaries not found: {}", missing.join(", ")));
    }
    Ok(())
}

fn process_one(cfg: &Config, settings: Settings, bucket: &str, key: &str, size: u64) -> Result<()> {
    ensure_dir(&settings.work_dir)?;
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&cfg.storage.root));
    let pipeline = Pipeline::new(Arc::new(settings), store, Arc::new(NoQueue))?;

    let notify = Notification {
        bucket: bucket.to_string(),
        key: key.to_string(),
        expected_size: size,
        receipt: ReceiptHandle("cli".into()),
    };
    match pipeline.process(0, &notify) {
        Outcome::Acknowledged { placed, manifest } => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "key": key,
                    "placed": placed.iter().map(|t| t.display_path()).collect::<Vec<_>>(),
                    "manifest": manifest,
                    "status": "ok"
                }))?
            );
            Ok(())
        }
        Outcome::Aborted { stage, error } => Err(anyhow!("{key} aborted in {stage:?}: {error}")),
    }
}

fn enqueue(cfg: &Config, settings: &Settings, bucket: &str, key: &str, size: u64) -> Result<()> {
    let queue = open_queue(cfg, settings)?;
    let path = queue.send(&event_payload(bucket, key, size))?;
    info!("[main] queued {bucket}/{key} as {}", path.display());
    Ok(())
}
