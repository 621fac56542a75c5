use anyhow::{Context, Result};
use std::path::Path;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

/// Copies by content so source and destination may sit on different devices.
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    let mut src = std::fs::File::open(from).with_context(|| format!("open {}", from.display()))?;
    let mut dst = std::fs::File::create(to).with_context(|| format!("create {}", to.display()))?;
    let n = std::io::copy(&mut src, &mut dst)
        .with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
    dst.sync_all().with_context(|| format!("sync {}", to.display()))?;
    Ok(n)
}

/// Replaces the first occurrence of `token` in `template` with `value`.
pub fn substitute_once(template: &str, token: &str, value: &str) -> String {
    if token.is_empty() {
        return template.to_string();
    }
    template.replacen(token, value, 1)
}
