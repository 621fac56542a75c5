use crate::util::{copy_file, ensure_dir};
use anyhow::{Context, Result, anyhow};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Object storage collaborator.
pub trait ObjectStore: Send + Sync {
    /// Downloads `bucket/key` into `dest`, returning the byte count.
    fn get_to_file(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64>;

    fn put_file(&self, src: &Path, bucket: &str, key: &str) -> Result<()>;

    fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    fn exists(&self, bucket: &str, key: &str) -> Result<bool>;
}

/// Buckets as directories under a root: `root/bucket/key`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let rel = Path::new(bucket).join(key.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!("invalid object reference {bucket}/{key}"));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_to_file(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let src = self.object_path(bucket, key)?;
        copy_file(&src, dest).with_context(|| format!("get {bucket}/{key}"))
    }

    fn put_file(&self, src: &Path, bucket: &str, key: &str) -> Result<()> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        info!("uploading {} -> {bucket}/{key}", src.display());
        copy_file(src, &dest).with_context(|| format!("put {bucket}/{key}"))?;
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        std::fs::remove_file(&path).with_context(|| format!("delete {bucket}/{key}"))
    }

    fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.object_path(bucket, key)?.is_file())
    }
}
