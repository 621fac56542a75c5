use crate::config::{ArgStrategy, ToolSpec};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// A fully built command line for one external binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    /// Builds the argument list for `spec` with the given input and output.
    pub fn build(spec: &ToolSpec, input: &Path, output: &str) -> Self {
        let input = input.to_string_lossy();
        let args = match &spec.args {
            ArgStrategy::Template {
                words,
                input_token,
                output_token,
            } => words
                .iter()
                .map(|w| w.replace(input_token, &input).replace(output_token, output))
                .collect(),
            ArgStrategy::Options(opts) => {
                let mut args = Vec::with_capacity(opts.len() + 2);
                args.push(input.into_owned());
                args.extend(opts.iter().cloned());
                args.push(output.to_string());
                args
            }
        };
        Self {
            program: spec.binary.clone(),
            args,
        }
    }

    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Completed {
    pub output: String,
    pub elapsed: Duration,
}

fn combined(out: &Output) -> String {
    let mut s = String::from_utf8_lossy(&out.stdout).into_owned();
    let err = String::from_utf8_lossy(&out.stderr);
    if !err.is_empty() {
        if !s.is_empty() && !s.ends_with('\n') {
            s.push('\n');
        }
        s.push_str(&err);
    }
    s
}

/// Runs `inv` to completion, once. A spawn error or a non-zero exit is an
/// error; captured output is logged either way.
pub fn invoke(worker_id: usize, label: &str, inv: &Invocation) -> Result<Completed> {
    debug!("[worker {worker_id}] {label} command \"{inv}\"");
    let started = Instant::now();
    let out = inv
        .command()
        .output()
        .with_context(|| format!("spawning {}", inv.program.display()))
        .inspect_err(|e| error!("[worker {worker_id}] {label} failed to start: {e:#}"))?;
    let text = combined(&out);
    let elapsed = started.elapsed();

    if !out.status.success() {
        error!("[worker {worker_id}] {label} exited with {}", out.status);
        if !text.trim().is_empty() {
            error!("[worker {worker_id}] {label} output [{}]", text.trim());
        }
        return Err(anyhow!("{label} command \"{inv}\" exited with {}", out.status));
    }

    info!(
        "[worker {worker_id}] {label} complete in {:.2} seconds",
        elapsed.as_secs_f64()
    );
    if !text.trim().is_empty() {
        debug!("[worker {worker_id}] {label} output [{}]", text.trim());
    }
    Ok(Completed {
        output: text,
        elapsed,
    })
}

/// Runs `inv` and returns its standard output; stderr only appears in the
/// error on failure.
pub fn run_stdout(inv: &Invocation) -> Result<Vec<u8>> {
    let out = inv
        .command()
        .output()
        .with_context(|| format!("spawning {}", inv.program.display()))?;
    if !out.status.success() {
        return Err(anyhow!(
            "command \"{inv}\" exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(out.stdout)
}

/// Resolves a binary name the way the shell would, for startup checks.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
