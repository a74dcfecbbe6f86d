//! Hands fully built worker command lines to tmux windows or detached
//! background processes. Argv lists stay unescaped until they cross into a
//! shell here.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::Context;

use crate::subprocess::Tool;

/// Escape one argv into a single shell-safe line.
pub fn escape_line(argv: &[String]) -> anyhow::Result<String> {
    shlex::try_join(argv.iter().map(String::as_str)).context("escaping worker command")
}

/// Open one detached tmux window named after the slug, running `line` from
/// the repository root.
pub fn spawn_tmux_window(repo: &Path, slug: &str, line: &str) -> anyhow::Result<()> {
    Tool::new("tmux")
        .args(&["new-window", "-d", "-n", slug, "-c"])
        .arg(&repo.to_string_lossy())
        .arg(line)
        .run_ok()
        .with_context(|| format!("opening tmux window for '{slug}'"))?;
    Ok(())
}

/// A detached worker plus the log file its output lands in.
pub struct BackgroundWorker {
    pub slug: String,
    pub log_path: PathBuf,
    pub child: Child,
}

/// Spawn one worker as a detached process, appending stdout and stderr to
/// `<parent>/logs/<slug>.log`.
pub fn spawn_background(
    repo: &Path,
    parent: &Path,
    slug: &str,
    argv: &[String],
) -> anyhow::Result<BackgroundWorker> {
    let logs_dir = parent.join("logs");
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;
    let log_path = logs_dir.join(format!("{slug}.log"));

    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("duplicating log handle for '{slug}'"))?;

    let (program, rest) = argv
        .split_first()
        .context("worker command must not be empty")?;
    let child = Command::new(program)
        .args(rest)
        .current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .with_context(|| format!("spawning worker for '{slug}'"))?;

    Ok(BackgroundWorker {
        slug: slug.to_string(),
        log_path,
        child,
    })
}
