//! Message queue collaborator and a directory-spool implementation of it.
//!
//! Spool layout for a queue `q` under `root`:
//! `root/q/*.json` are visible messages, `root/q/inflight/*.json` are claimed
//! ones. A claim is the receipt; deleting the receipt removes the file.
//! Claims older than the visibility timeout become visible again.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Opaque token used to acknowledge (delete) a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

#[derive(Debug, Clone)]
pub struct Message {
    pub payload: String,
    pub receipt: ReceiptHandle,
}

pub trait MessageQueue: Send + Sync {
    /// Blocks up to `wait` for at most `max` messages.
    fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Message>>;

    /// Acknowledges a received message so it is never redelivered.
    fn delete(&self, receipt: &ReceiptHandle) -> Result<()>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct SpoolQueue {
    dir: PathBuf,
    inflight: PathBuf,
    visibility: Duration,
    claim: Mutex<()>,
    seq: AtomicU64,
}

impl SpoolQueue {
    pub fn open(root: &Path, queue_name: &str, visibility: Duration) -> Result<Self> {
        let dir = root.join(queue_name);
        let inflight = dir.join("inflight");
        std::fs::create_dir_all(&inflight)
            .with_context(|| format!("create spool queue {}", inflight.display()))?;
        Ok(Self {
            dir,
            inflight,
            visibility,
            claim: Mutex::new(()),
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Adds a message; names sort by enqueue time.
    pub fn send(&self, payload: &str) -> Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{nanos:024}-{}-{seq:06}.json", std::process::id());
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let path = self.dir.join(&name);
        std::fs::write(&tmp, payload).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("publish {}", path.display()))?;
        Ok(path)
    }

    fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("list {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn requeue_expired(&self) -> Result<()> {
        for path in Self::json_files(&self.inflight)? {
            let age = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            if age >= self.visibility {
                if let Some(name) = path.file_name() {
                    warn!("spool message {} not acknowledged within {:?}, redelivering", path.display(), self.visibility);
                    if let Err(e) = std::fs::rename(&path, self.dir.join(name)) {
                        warn!("redelivering spool message {} failed: {e}", path.display());
                    }
                }
            }
        }
        Ok(())
    }

    fn claim_next(&self, max: usize) -> Result<Vec<Message>> {
        let _guard = self.claim.lock().map_err(|_| anyhow!("spool claim lock poisoned"))?;
        self.requeue_expired()?;
        let mut out = Vec::new();
        for path in Self::json_files(&self.dir)?.into_iter().take(max) {
            let Some(name) = path.file_name() else { continue };
            let claimed = self.inflight.join(name);
            if std::fs::rename(&path, &claimed).is_err() {
                continue;
            }
            // renaming keeps the old mtime; the claim time starts now
            let _ = std::fs::File::options()
                .append(true)
                .open(&claimed)
                .and_then(|f| f.set_modified(SystemTime::now()));
            let payload = std::fs::read_to_string(&claimed)
                .with_context(|| format!("read {}", claimed.display()))?;
            debug!("claimed spool message {}", claimed.display());
            out.push(Message {
                payload,
                receipt: ReceiptHandle(claimed.display().to_string()),
            });
        }
        Ok(out)
    }
}

impl MessageQueue for SpoolQueue {
    fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Message>> {
        let deadline = Instant::now() + wait;
        loop {
            let got = self.claim_next(max.max(1))?;
            if !got.is_empty() || Instant::now() >= deadline {
                return Ok(got);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        let path = PathBuf::from(&receipt.0);
        if !path.starts_with(&self.inflight) {
            return Err(anyhow!("receipt does not belong to this queue: {}", receipt.0));
        }
        std::fs::remove_file(&path).with_context(|| format!("delete message {}", path.display()))
    }
}

/// A queue that never yields messages and accepts every acknowledgement, for
/// one-off runs outside the service loop.
pub struct NoQueue;

impl MessageQueue for NoQueue {
    fn receive(&self, _max: usize, wait: Duration) -> Result<Vec<Message>> {
        std::thread::sleep(wait);
        Ok(Vec::new())
    }

    fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        debug!("not acknowledging {} (no queue)", receipt.0);
        Ok(())
    }
}
