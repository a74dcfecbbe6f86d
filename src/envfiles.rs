//! Copies untracked env files from the repository into a workspace.
//!
//! Tracked files arrive through the worktree checkout itself; this step
//! carries over the gitignored ones (`.env`, `.env.local`, `service/prod.env`)
//! that agents need to actually run anything.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::git;

/// Files larger than this are skipped.
pub const MAX_ENV_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// How many directory levels below the repo root are searched.
const MAX_DEPTH: usize = 3;

/// Copy env files from `repo` into `workspace`, preserving relative paths.
///
/// A file qualifies when its name starts with `.env` or ends with `.env`,
/// it is not git-tracked, and it is at most [`MAX_ENV_FILE_SIZE`] bytes.
/// `.git` and `skip_dir` (the workspace parent, which holds other features'
/// copies) are never descended into. Returns the copied relative paths in
/// sorted order; port rewriting operates only on this list.
pub fn copy_env_files(
    repo: &Path,
    workspace: &Path,
    skip_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let skip = skip_dir.canonicalize().ok();
    let mut copied = Vec::new();
    walk(repo, repo, workspace, skip.as_deref(), 0, &mut copied)?;
    copied.sort();
    Ok(copied)
}

fn is_env_name(name: &str) -> bool {
    name.starts_with(".env") || name.ends_with(".env")
}

fn walk(
    repo: &Path,
    dir: &Path,
    workspace: &Path,
    skip: Option<&Path>,
    depth: usize,
    copied: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if name == ".git" {
                continue;
            }
            if let Some(skip) = skip
                && path.canonicalize().is_ok_and(|p| p == skip)
            {
                continue;
            }
            if depth < MAX_DEPTH {
                walk(repo, &path, workspace, skip, depth + 1, copied)?;
            }
            continue;
        }
        if !file_type.is_file() || !is_env_name(&name) {
            continue;
        }

        let rel = path
            .strip_prefix(repo)
            .context("env file outside repo root")?
            .to_path_buf();
        let size = entry.metadata()?.len();
        if size > MAX_ENV_FILE_SIZE {
            tracing::warn!(
                "skipping {}: {size} bytes exceeds the env-file size limit",
                rel.display()
            );
            continue;
        }
        if git::is_tracked(repo, &rel)? {
            continue;
        }

        let dest = workspace.join(&rel);
        if let Some(dest_dir) = dest.parent() {
            std::fs::create_dir_all(dest_dir)
                .with_context(|| format!("creating {}", dest_dir.display()))?;
        }
        std::fs::copy(&path, &dest)
            .with_context(|| format!("copying {} into the workspace", rel.display()))?;
        copied.push(rel);
    }
    Ok(())
}
