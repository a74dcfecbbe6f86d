//! Port-offset rewriting for copied env files.
//!
//! Feature N shifts every `PORT`-named variable by `N * offset`, so
//! concurrently running features get non-overlapping port ranges without a
//! central allocator. Feature 0 keeps the default ports untouched.
//!
//! The rewrite is not idempotent. It runs exactly once per workspace,
//! immediately after the env copy; applying it to an already-shifted file
//! shifts again.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;

/// Audit log location inside a workspace, truncated fresh per invocation.
pub const AUDIT_LOG: &str = ".feature-context/env-ports-modified.log";

/// One rewritten variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRewrite {
    /// File path relative to the workspace.
    pub file: PathBuf,
    pub name: String,
    pub old: i64,
    pub new: i64,
}

fn re_assignment() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=([0-9]+)$").unwrap())
}

/// A rewritable line: a plain `NAME=digits` assignment whose name contains
/// the uppercase substring `PORT`. Anything else (quotes, spaces, comments,
/// lowercase `port`, non-numeric values) passes through untouched.
fn parse_port_line(line: &str) -> Option<(&str, i64)> {
    let caps = re_assignment().captures(line)?;
    let name = caps.get(1)?.as_str();
    if !name.contains("PORT") {
        return None;
    }
    let value = caps.get(2)?.as_str().parse().ok()?;
    Some((name, value))
}

/// Shift the port variables in `env_files` (relative paths under
/// `workspace`, the env-copy output) by `index * offset`.
///
/// `index == 0` is a complete no-op: no file is touched and no audit log is
/// created. Otherwise changed files are replaced via temp-file-then-rename
/// and every rewrite is recorded in [`AUDIT_LOG`]. Values are plain `i64`
/// arithmetic; keeping the result inside the valid port range is the
/// caller's responsibility.
pub fn rewrite_ports(
    workspace: &Path,
    env_files: &[PathBuf],
    index: usize,
    offset: u32,
) -> anyhow::Result<Vec<PortRewrite>> {
    if index == 0 {
        return Ok(Vec::new());
    }
    let delta = i64::try_from(index).context("feature index out of range")? * i64::from(offset);

    let log_path = truncate_audit_log(workspace)?;

    let mut rewrites = Vec::new();
    for rel in env_files {
        let path = workspace.join(rel);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;

        let before = rewrites.len();
        let updated = rewrite_text(&text, rel, delta, &mut rewrites);
        if rewrites.len() == before {
            continue;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, updated).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
    }

    write_audit_log(&log_path, &rewrites)?;
    Ok(rewrites)
}

/// Rewrite matching lines, preserving every other byte including line
/// terminators (CRLF stays CRLF, a missing final newline stays missing).
fn rewrite_text(
    text: &str,
    rel: &Path,
    delta: i64,
    rewrites: &mut Vec<PortRewrite>,
) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in text.split_inclusive('\n') {
        let (content, terminator) = if let Some(c) = segment.strip_suffix("\r\n") {
            (c, "\r\n")
        } else if let Some(c) = segment.strip_suffix('\n') {
            (c, "\n")
        } else {
            (segment, "")
        };

        if let Some((name, old)) = parse_port_line(content) {
            let new = old + delta;
            out.push_str(&format!("{name}={new}"));
            rewrites.push(PortRewrite {
                file: rel.to_path_buf(),
                name: name.to_string(),
                old,
                new,
            });
        } else {
            out.push_str(content);
        }
        out.push_str(terminator);
    }
    out
}

/// Truncate the audit log before the first rewrite; a run that fails midway
/// must not leave the previous invocation's log next to changed files.
fn truncate_audit_log(workspace: &Path) -> anyhow::Result<PathBuf> {
    let log_path = workspace.join(AUDIT_LOG);
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(&log_path, "")
        .with_context(|| format!("truncating {}", log_path.display()))?;
    Ok(log_path)
}

fn write_audit_log(log_path: &Path, rewrites: &[PortRewrite]) -> anyhow::Result<()> {
    let mut log = String::new();
    for r in rewrites {
        log.push_str(&format!(
            "{}: {} {} → {}\n",
            r.file.display(),
            r.name,
            r.old,
            r.new
        ));
    }
    std::fs::write(log_path, log).with_context(|| format!("writing {}", log_path.display()))
}
